//! BCI Viewer - signal check for an amplifier
//!
//! Pulls an amplifier stream and prints per-channel mean, RMS, min and max
//! over a rolling window at a fixed refresh interval. Exits on `QUIT`, end
//! of input or Ctrl+C.
//!
//! ```bash
//! bci-viewer --amp-name "Amp" --window 2 --refresh 1
//! ```

use anyhow::{Result, bail};
use clap::Parser;
use lsl::Pullable;
use std::io::BufRead;
use std::thread;
use std::time::{Duration, Instant};

use bci_launcher::commands::Command;
use bci_launcher::lsl::record::calculate_pull_timeout;
use bci_launcher::lsl::{AmpTarget, StreamResolutionConfig, local_clock, resolve_amp};
use bci_launcher::state::{RunState, SharedState};
use bci_launcher::viewer::{SignalWindow, channel_labels};
use bci_launcher::zarr::parse_desc_to_json;

#[derive(Parser, Clone)]
#[command(name = "bci-viewer")]
#[command(about = "Show rolling per-channel statistics of an amplifier stream")]
struct Args {
    #[arg(long, help = "Amplifier stream name (any when omitted)")]
    amp_name: Option<String>,

    #[arg(long, help = "Amplifier serial number (any when omitted or N/A)")]
    amp_serial: Option<String>,

    #[arg(long, help = "Only accept streams of type EEG")]
    eeg_only: bool,

    #[arg(long, default_value = "2.0", help = "Statistics window in seconds")]
    window: f64,

    #[arg(long, default_value = "1.0", help = "Refresh interval in seconds")]
    refresh: f64,

    #[arg(long, default_value = "5.0", help = "Timeout for stream resolution in seconds")]
    resolve_timeout: f64,
}

fn view(args: Args, state: SharedState) -> Result<()> {
    let target = AmpTarget {
        name: args.amp_name.clone(),
        serial: args.amp_serial.clone(),
        eeg_only: args.eeg_only,
    };
    let resolution = StreamResolutionConfig {
        timeout: args.resolve_timeout,
        ..Default::default()
    };
    let (info, amp) = resolve_amp(&target, &resolution, false)?;

    let inl = lsl::StreamInlet::new(&info, 300, 0, true).map_err(|e| anyhow::anyhow!("LSL error: {}", e))?;
    let mut full_info = inl
        .info(lsl::FOREVER)
        .map_err(|e| anyhow::anyhow!("LSL error: {}", e))?;
    let labels = full_info
        .to_xml()
        .map(|xml| channel_labels(&parse_desc_to_json(&xml)))
        .unwrap_or_default();

    // irregular streams still get a window of a few hundred samples
    let rate = if amp.srate > 0.0 { amp.srate } else { 100.0 };
    let capacity = (rate * args.window.max(0.1)) as usize;
    let mut window = SignalWindow::new(amp.channels, capacity);
    let pull_timeout = calculate_pull_timeout(amp.srate, None);
    let refresh = Duration::from_secs_f64(args.refresh.max(0.1));

    println!("Viewing {} ({} channels, {} Hz)", amp.label(), amp.channels, amp.srate);

    let mut sample: Vec<f64> = Vec::with_capacity(amp.channels);
    let mut last_refresh = Instant::now();
    let mut pulled: u64 = 0;
    let mut last_ts = 0.0;
    while state.is(RunState::Started) {
        sample.clear();
        let ts = inl
            .pull_sample_buf(&mut sample, pull_timeout)
            .map_err(|e| anyhow::anyhow!("LSL error: {}", e))?;
        if ts != 0.0 {
            window.push(&sample);
            pulled += 1;
            last_ts = ts;
        }
        if last_refresh.elapsed() >= refresh {
            // exact only when the amplifier runs on this host
            let age_ms = if last_ts > 0.0 { (local_clock() - last_ts) * 1000.0 } else { f64::NAN };
            println!(
                "--- {} samples pulled, {} in window, last sample {:.0} ms old ---",
                pulled,
                window.len(),
                age_ms
            );
            print!("{}", window.render_table(&labels));
            last_refresh = Instant::now();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    bci_launcher::logging::init_cli(false, false);

    if !(args.window > 0.0 && args.refresh > 0.0) {
        bail!("--window and --refresh must be positive");
    }

    let state = SharedState::new(RunState::Started);
    {
        let state = state.clone();
        thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if matches!(Command::parse(&line), Ok(Some(Command::Quit | Command::Stop))) {
                    break;
                }
            }
            state.set(RunState::Stopped);
        });
    }

    let viewer = {
        let state = state.clone();
        thread::spawn(move || {
            let result = view(args, state.clone());
            state.set(RunState::Stopped);
            result
        })
    };

    let mut join = tokio::task::spawn_blocking(move || viewer.join());
    let joined = tokio::select! {
        res = &mut join => res,
        _ = tokio::signal::ctrl_c() => {
            state.set(RunState::Stopped);
            join.await
        }
    };

    match joined {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => bail!("Viewer thread panicked"),
        Err(e) => bail!("Viewer task failed: {}", e),
    }
}
