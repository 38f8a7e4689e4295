//! BCI Recorder - record one EEG amplifier to Zarr
//!
//! Resolves an amplifier by name and/or serial number and writes its samples
//! to `<record-dir>/<YYYYMMDD-HHMMSS>-raw.zarr`.
//!
//! # Usage
//!
//! ```bash
//! # Record until Enter or Ctrl+C
//! bci-recorder --record-dir data/S01-mi --amp-name "Amp" --amp-serial 1234
//!
//! # Pick the amplifier from a list
//! bci-recorder --record-dir data/S01-mi
//!
//! # Controlled by a parent process
//! bci-recorder --record-dir data/S01-mi --amp-name "Amp" --interactive
//! ```
//!
//! # Interactive Commands
//!
//! - `START` - begin (or resume) recording
//! - `STOP` - pause recording
//! - `STOP_AFTER <seconds>` - pause after the given duration
//! - `QUIT` - finish the recording and exit

use anyhow::{Result, bail};
use clap::Parser;
use std::io::{BufRead, Write};
use std::thread;

use bci_launcher::cli::RecorderArgs;
use bci_launcher::commands::handle_commands;
use bci_launcher::error::RecorderError;
use bci_launcher::lsl::record::{RecordingParams, RecordingSignals, ZarrConfig, record_lsl_stream};
use bci_launcher::lsl::{AmpTarget, search_amps};
use bci_launcher::state::RunState;
use bci_launcher::zarr::{SessionAttrs, recording_store_path};

/// List the amplifiers on the network and read the operator's choice.
fn choose_amp(args: &RecorderArgs) -> Result<AmpTarget> {
    let amps = search_amps(args.resolve_timeout, true, args.eeg_only)?;
    if amps.is_empty() {
        bail!("No amplifier found on the network");
    }

    println!("Available amplifiers:");
    for (i, amp) in amps.iter().enumerate() {
        println!("  [{}] {} ({} ch, {} Hz)", i, amp.label(), amp.channels, amp.srate);
    }
    print!("Amplifier index [0]: ");
    std::io::stdout().flush().ok();

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let index = match line.trim() {
        "" => 0,
        s => s.parse::<usize>()?,
    };
    let Some(amp) = amps.get(index) else {
        bail!("No amplifier with index {}", index);
    };

    Ok(AmpTarget {
        name: Some(amp.name.clone()),
        serial: Some(amp.serial.clone()),
        eeg_only: args.eeg_only,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = RecorderArgs::parse();

    if !args.quiet && !args.interactive {
        bci_launcher::display_license_notice("bci-recorder");
    }
    bci_launcher::logging::init_cli(false, args.quiet);

    let record_dir = args.record_dir.clone().ok_or(RecorderError::NoRecordDir)?;
    std::fs::create_dir_all(&record_dir)?;

    let target = if args.amp_name.is_none() && args.amp_serial.is_none() && !args.interactive {
        choose_amp(&args)?
    } else {
        args.target()
    };

    let initial = if args.interactive {
        RunState::Waiting
    } else {
        RunState::Started
    };
    let signals = RecordingSignals::new(initial);

    let session = SessionAttrs {
        subject: args.subject.clone(),
        session_id: Some(
            args.session_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        ),
        modality: args.modality.map(|m| m.tag().to_string()),
    };
    let store_path = recording_store_path(&record_dir, chrono::Local::now());
    let recorder_config_json = args.to_recorder_config_json(Some(chrono::Utc::now().to_rfc3339()))?;

    let params = RecordingParams {
        target,
        signals: signals.clone(),
        quiet: args.quiet,
        zarr_config: ZarrConfig {
            store_path: store_path.clone(),
            session,
        },
        recording_config: args.recording_config(),
        resolution_config: args.resolution_config(),
        recorder_config_json,
        memory_monitor: args.memory_monitor,
    };

    let recording_thread = {
        let state = signals.state.clone();
        thread::spawn(move || {
            let result = record_lsl_stream(params);
            state.set(RunState::Stopped);
            result
        })
    };

    // stdin readers stay on plain threads: they must not hold up runtime shutdown
    if args.interactive {
        let signals = signals.clone();
        thread::spawn(move || {
            if let Err(e) = handle_commands(std::io::stdin().lock(), signals) {
                tracing::error!("Command handling error: {}", e);
            }
        });
    } else {
        if !args.quiet {
            println!("Recording to {}. Press Enter or Ctrl+C to stop.", store_path.display());
        }
        let state = signals.state.clone();
        thread::spawn(move || {
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
            state.set(RunState::Stopped);
        });
    }

    let mut join = tokio::task::spawn_blocking(move || recording_thread.join());
    let joined = tokio::select! {
        res = &mut join => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, finishing the recording");
            signals.state.set(RunState::Stopped);
            join.await
        }
    };

    match joined {
        Ok(Ok(Ok(summary))) => {
            if !args.quiet {
                println!(
                    "Recorded {} samples from {} into {}",
                    summary.samples,
                    summary.amp.label(),
                    summary.store_path.display()
                );
            }
            Ok(())
        }
        Ok(Ok(Err(e))) => Err(e),
        Ok(Err(_)) => bail!("Recording thread panicked"),
        Err(e) => bail!("Recording task failed: {}", e),
    }
}
