//! Module communication client.
//!
//! Drives an XBee module on a host serial port through the firmware's own AT
//! command engine, so the tests exercise the same code the board runs.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serialport::SerialPort;

use xbee_atcmd_firmware::cmdlist::{CommandList, CommandListEntry, ListStatus};
use xbee_atcmd_firmware::dispatcher::CompletedResponse;
use xbee_atcmd_firmware::protocol::framing::{encode_api_frame, FrameAccumulator};
use xbee_atcmd_firmware::transport::{Clock, Transport, TransportError};
use xbee_atcmd_firmware::{AtCmd, AtCmdError, AtCommand, DeviceId, RequestFlags, WpanAddress};

/// Writes frames straight to the serial port
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl Transport for SerialTransport {
    fn send_frame(&mut self, _device: DeviceId, payload: &[u8]) -> Result<(), TransportError> {
        let frame = encode_api_frame(payload).map_err(|_| TransportError::FrameTooLarge)?;
        self.port
            .write_all(&frame)
            .and_then(|_| self.port.flush())
            .map_err(|_| TransportError::WriteError)
    }
}

/// Milliseconds since the client was opened
pub struct StdClock {
    start: Instant,
}

impl Clock for StdClock {
    fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

pub type Engine = AtCmd<SerialTransport, StdClock, ()>;

fn at_error(error: AtCmdError) -> anyhow::Error {
    anyhow!("{}", error)
}

/// Find serial ports that look like USB serial adapters
pub fn find_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| p.port_name)
        .filter(|name| name.contains("ttyUSB") || name.contains("ttyACM") || name.contains("usbserial"))
        .collect())
}

/// Resolve a port argument - returns the port path if not "auto", otherwise auto-detects.
pub fn resolve_port(port_arg: &str) -> Result<String> {
    if port_arg != "auto" {
        return Ok(port_arg.to_string());
    }
    match find_ports()?.into_iter().next() {
        Some(port) => Ok(port),
        None => anyhow::bail!("No serial adapter found - ensure the module is connected"),
    }
}

/// Client for an XBee module in API mode.
pub struct XbeeClient {
    engine: Engine,
    port: Box<dyn SerialPort>,
    accumulator: FrameAccumulator,
}

impl XbeeClient {
    /// Open the module's serial port.
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(20))
            .open()?;
        let writer = port.try_clone()?;

        Ok(Self {
            engine: AtCmd::new(
                SerialTransport { port: writer },
                StdClock {
                    start: Instant::now(),
                },
            ),
            port,
            accumulator: FrameAccumulator::new(),
        })
    }

    /// Clear any pending data in the serial buffer.
    pub fn clear_buffer(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::All)?;
        self.accumulator.reset();
        Ok(())
    }

    /// Read what the port has, dispatch complete frames, then tick.
    pub fn poll(&mut self) -> Result<()> {
        let mut buf = [0u8; 64];
        match self.port.read(&mut buf) {
            Ok(count) => {
                for &byte in &buf[..count] {
                    if let Some(payload) = self.accumulator.push(byte) {
                        self.engine.dispatch(&mut (), DeviceId::LOCAL, &payload);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }
        self.engine.tick(&mut ());
        Ok(())
    }

    /// Send one command and wait for its response (or the engine's timeout).
    pub fn query(
        &mut self,
        command: &str,
        parameter: &[u8],
        target: Option<WpanAddress>,
    ) -> Result<CompletedResponse> {
        self.query_with_flags(command, parameter, target, RequestFlags::empty())
    }

    pub fn query_with_flags(
        &mut self,
        command: &str,
        parameter: &[u8],
        target: Option<WpanAddress>,
        flags: RequestFlags,
    ) -> Result<CompletedResponse> {
        let command =
            AtCommand::parse(command).ok_or_else(|| anyhow!("Bad AT command {:?}", command))?;

        let handle = self
            .engine
            .create(DeviceId::LOCAL, command)
            .map_err(at_error)?;
        let setup = self
            .engine
            .set_target(handle, target)
            .and_then(|_| self.engine.set_flags(handle, flags))
            .and_then(|_| self.engine.set_param_bytes(handle, parameter))
            .and_then(|_| self.engine.set_mailbox(handle))
            .and_then(|_| self.engine.send(handle));
        if let Err(e) = setup {
            let _ = self.engine.release(handle);
            return Err(at_error(e));
        }

        loop {
            self.poll()?;
            if let Some(response) = self.engine.take_response(handle).map_err(at_error)? {
                let _ = self.engine.release(handle);
                return Ok(response);
            }
        }
    }

    /// Run a command list to completion.
    pub fn run_list<B>(
        &mut self,
        list: &[CommandListEntry<B>],
        base: &mut B,
        target: Option<WpanAddress>,
    ) -> Result<ListStatus> {
        let mut runner = CommandList::new();
        runner
            .execute(&mut self.engine, DeviceId::LOCAL, list, base, target)
            .map_err(at_error)?;

        loop {
            self.poll()?;
            let status = runner.advance(&mut self.engine, base);
            if status.is_terminal() {
                return Ok(status);
            }
        }
    }
}
