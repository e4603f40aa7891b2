//! Hardware-in-the-loop tests for the AT command engine.
//!
//! Connect an XBee module in API mode (AP=1) through a USB serial adapter and
//! run these against it. Optionally pass the 64-bit address of a second,
//! joined module to test remote commands.

mod device;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;

use xbee_atcmd_firmware::{Addr64, WpanAddress};

use device::{resolve_port, XbeeClient};
use tests::{print_results, run_all_tests};

#[derive(Parser)]
#[command(name = "integration-tests")]
#[command(about = "Hardware tests for the XBee AT command engine")]
struct Args {
    /// Serial port for the module (use "auto" to auto-detect)
    #[arg(short, long, default_value = "auto")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// 64-bit address of a remote module, as 16 hex digits
    #[arg(short, long)]
    remote: Option<String>,
}

fn parse_addr64(text: &str) -> anyhow::Result<Addr64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if digits.len() != 16 {
        anyhow::bail!("Expected 16 hex digits, got {:?}", text);
    }
    let value = u64::from_str_radix(&digits, 16).context("Bad remote address")?;
    Ok(Addr64(value.to_be_bytes()))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Resolve port (auto-detect if "auto")
    let port = resolve_port(&args.port)?;
    let remote = args
        .remote
        .as_deref()
        .map(parse_addr64)
        .transpose()?
        .map(WpanAddress::ieee);

    println!("{}", "XBee AT Command Integration Tests".bold());
    println!("Port: {}", port);
    println!("Baud: {}", args.baud);
    if let Some(address) = &remote {
        println!("Remote: {}", address.ieee);
    }
    println!();

    println!("Connecting to module...");
    let mut device = XbeeClient::new(&port, args.baud)?;
    device.clear_buffer()?;
    println!("{}", "Connected!".green());

    println!("\nRunning tests...\n");

    let results = run_all_tests(&mut device, remote);
    print_results(&results);

    // Exit with error code if any tests failed
    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
