//! Stdin command protocol shared by `bci-recorder` and `bci-protocol`.
//!
//! Commands are case-insensitive: `START`, `STOP`, `STOP_AFTER <secs>`, `QUIT`.
//! End of input is treated like `QUIT`, since it means the parent went away.

use anyhow::Result;
use std::io::{BufRead, Write};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use crate::lsl::record::RecordingSignals;
use crate::state::RunState;
use crate::status::StatusLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    StopAfter(u64),
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let cmd = line.trim();
        if cmd.is_empty() {
            return Ok(None);
        }
        let (keyword, arg) = match cmd.split_once(char::is_whitespace) {
            Some((keyword, arg)) => (keyword, arg.trim()),
            None => (cmd, ""),
        };
        let command = match keyword.to_ascii_uppercase().as_str() {
            "START" => Command::Start,
            "STOP" => Command::Stop,
            "QUIT" => Command::Quit,
            "STOP_AFTER" if arg.is_empty() => return Err("STOP_AFTER needs a number of seconds".to_string()),
            "STOP_AFTER" => arg
                .parse::<u64>()
                .map(Command::StopAfter)
                .map_err(|_| format!("bad STOP_AFTER arg: {}", arg))?,
            _ => return Err(format!("unknown command: {}", cmd)),
        };
        if !arg.is_empty() && !matches!(command, Command::StopAfter(_)) {
            return Err(format!("{} takes no argument", keyword.to_ascii_uppercase()));
        }
        Ok(Some(command))
    }

    pub fn as_line(&self) -> String {
        match self {
            Command::Start => "START".to_string(),
            Command::Stop => "STOP".to_string(),
            Command::StopAfter(secs) => format!("STOP_AFTER {}", secs),
            Command::Quit => "QUIT".to_string(),
        }
    }
}

fn report_error(msg: &str) {
    println!("ERROR {}", msg);
    std::io::stdout().flush().ok();
}

/// Drive a recorder's run flag from command lines.
///
/// `START` records, `STOP` pauses (flag `Waiting`), `STOP_AFTER` pauses after
/// the given duration, `QUIT` finishes the recording (flag `Stopped`).
pub fn handle_commands<R: BufRead>(input: R, signals: RecordingSignals) -> Result<()> {
    for line_res in input.lines() {
        let line = match line_res {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("stdin read error: {}", e);
                break;
            }
        };

        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Start)) => {
                signals.state.set(RunState::Started);
                StatusLine::Started.emit();
            }
            Ok(Some(Command::Stop)) => {
                signals.state.set(RunState::Waiting);
                StatusLine::Stopped.emit();
            }
            Ok(Some(Command::StopAfter(secs))) => spawn_stop_timer(&signals, secs),
            Ok(Some(Command::Quit)) => {
                StatusLine::Quit.emit();
                signals.state.set(RunState::Stopped);
                return Ok(());
            }
            Err(msg) => report_error(&msg),
        }
    }

    // stdin closed: nobody can send QUIT any more
    signals.state.set(RunState::Stopped);
    Ok(())
}

fn spawn_stop_timer(signals: &RecordingSignals, secs: u64) {
    let signals = signals.clone();
    let irregular = signals.irregular.load(Ordering::SeqCst);
    if irregular {
        // events may be sparse or never arrive, so the countdown starts now
        println!("STATUS WILL STOP AFTER {}s (irregular stream: timer starts immediately)", secs);
    } else {
        println!("STATUS WILL STOP AFTER {}s (regular stream: timer starts after first sample)", secs);
    }
    std::io::stdout().flush().ok();

    thread::spawn(move || {
        if !irregular {
            while !signals.first_sample.wait(Duration::from_secs(1)) {
                if signals.state.is(RunState::Stopped) {
                    return;
                }
            }
        }
        println!("STATUS TIMER_STARTED ({}s countdown begins now)", secs);
        std::io::stdout().flush().ok();

        if signals.state.wait_for(RunState::Stopped, Duration::from_secs(secs)) {
            return;
        }
        if signals.state.transition(RunState::Started, RunState::Waiting) {
            StatusLine::StoppedByTimer { secs }.emit();
        }
    });
}

/// Drive a protocol's run flag: `START` moves `Waiting -> Started`, while
/// `STOP`, `QUIT` and end of input abort it.
pub fn handle_protocol_commands<R: BufRead>(input: R, state: crate::state::SharedState) {
    for line_res in input.lines() {
        let Ok(line) = line_res else { break };
        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Start)) => {
                if !state.transition(RunState::Waiting, RunState::Started) {
                    report_error("protocol is not waiting for START");
                }
            }
            Ok(Some(Command::Stop)) | Ok(Some(Command::Quit)) => {
                state.set(RunState::Stopped);
                return;
            }
            Ok(Some(Command::StopAfter(_))) => report_error("STOP_AFTER is not supported by the protocol"),
            Err(msg) => report_error(&msg),
        }
    }
    state.set(RunState::Stopped);
}
