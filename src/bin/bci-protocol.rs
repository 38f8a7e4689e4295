//! BCI Protocol - cue-sequence protocol driven over stdin
//!
//! Reads a run snapshot written by the launcher, announces `STATUS WAITING`
//! and waits for `START`. Each trial shows a GAP, a READY and a direction
//! cue; every phase with a trigger code is pushed on the `BCI-Markers` LSL
//! stream. `STOP`, `QUIT` or end of input abort the run.
//!
//! # Usage
//!
//! ```bash
//! bci-protocol --config data/S01-mi/offline_20250101-120000.json
//! bci-protocol --config run.json --auto-start --dry-run
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use bci_launcher::commands::handle_protocol_commands;
use bci_launcher::config::experiment::RunSnapshot;
use bci_launcher::protocol::{
    LslMarkerOutlet, MarkerSink, ProtocolOutcome, ProtocolParams, build_trial_plan, run_trials,
};
use bci_launcher::state::{RunState, SharedState};
use bci_launcher::status::StatusLine;

#[derive(Parser)]
#[command(name = "bci-protocol")]
#[command(about = "Run a cue-sequence BCI protocol, emitting LSL markers")]
struct Args {
    #[arg(long, help = "Run snapshot (JSON) written by the launcher")]
    config: PathBuf,

    #[arg(long, help = "Start without waiting for START on stdin")]
    auto_start: bool,

    #[arg(long, help = "Log markers instead of opening an LSL outlet")]
    dry_run: bool,

    #[arg(long, short = 'v', help = "Verbose logging")]
    verbose: bool,
}

/// Markers written to the log only.
struct LoggedMarkers;

impl MarkerSink for LoggedMarkers {
    fn push(&mut self, code: i32) -> Result<()> {
        tracing::info!("marker {}", code);
        Ok(())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    bci_launcher::logging::init_cli(args.verbose, false);

    let snapshot = RunSnapshot::load(&args.config)?;
    let params = ProtocolParams::from_snapshot(&snapshot)
        .with_context(|| format!("Invalid protocol parameters in {}", args.config.display()))?;
    let plan = build_trial_plan(&params.directions, params.trials, params.seed);
    tracing::info!(
        "{} protocol ({}): {} trials over {:?}",
        snapshot.protocol,
        snapshot.modality,
        plan.len(),
        params.directions
    );

    let state = SharedState::new(RunState::Waiting);
    {
        let state = state.clone();
        thread::spawn(move || handle_protocol_commands(std::io::stdin().lock(), state));
    }

    if args.auto_start {
        state.transition(RunState::Waiting, RunState::Started);
    } else {
        StatusLine::Waiting.emit();
        while state.wait_while(RunState::Waiting, Duration::from_secs(1)) == RunState::Waiting {}
    }
    if !state.is(RunState::Started) {
        StatusLine::Aborted.emit();
        return Ok(());
    }
    StatusLine::Started.emit();

    let mut sink: Box<dyn MarkerSink> = if args.dry_run {
        Box::new(LoggedMarkers)
    } else {
        let source_id = format!("bci-markers-{}", std::process::id());
        Box::new(LslMarkerOutlet::new(&source_id)?)
    };

    match run_trials(&params, &plan, &state, sink.as_mut())? {
        ProtocolOutcome::Finished { trials } => StatusLine::Finished { trials }.emit(),
        ProtocolOutcome::Aborted { completed } => {
            tracing::info!("Aborted after {} trial(s)", completed);
            StatusLine::Aborted.emit();
        }
    }
    Ok(())
}
