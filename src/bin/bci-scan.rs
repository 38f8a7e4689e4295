//! BCI Scan - list the amplifiers visible on the network
//!
//! ```bash
//! bci-scan --timeout 2
//! bci-scan --eeg-only --json
//! ```

use anyhow::Result;
use clap::Parser;

use bci_launcher::lsl::{library_version, protocol_version, search_amps};

#[derive(Parser)]
#[command(name = "bci-scan")]
#[command(about = "List LSL amplifier streams on the network")]
struct Args {
    #[arg(long, default_value = "1.0", help = "Search duration in seconds")]
    timeout: f64,

    #[arg(long, help = "Include Markers streams")]
    all: bool,

    #[arg(long, help = "Only list streams of type EEG")]
    eeg_only: bool,

    #[arg(long, help = "Print JSON instead of a table")]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    bci_launcher::logging::init_cli(false, args.json);

    let amps = search_amps(args.timeout, !args.all, args.eeg_only)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&amps)?);
        return Ok(());
    }

    println!(
        "liblsl {} (protocol {}), {} stream(s) found",
        library_version(),
        protocol_version(),
        amps.len()
    );
    if amps.is_empty() {
        return Ok(());
    }
    println!(
        "{:<24}\t{:<8}\t{:<14}\t{:>4}\t{:>8}\t{:<10}\t{}",
        "name", "type", "serial", "ch", "rate", "format", "host"
    );
    for amp in &amps {
        println!(
            "{:<24}\t{:<8}\t{:<14}\t{:>4}\t{:>8.1}\t{:<10}\t{}",
            amp.name, amp.stream_type, amp.serial, amp.channels, amp.srate, amp.channel_format, amp.hostname
        );
    }
    Ok(())
}
