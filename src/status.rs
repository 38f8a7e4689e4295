//! `STATUS ...` lines written by the subprocesses on stdout.
//!
//! The launcher parses these to drive the session state machine; anything
//! that does not parse is shown as plain output.

use std::fmt;
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    /// Recorder resolved its amplifier.
    Connected { name: String, serial: String },
    /// Process is armed and waits for START.
    Waiting,
    Started,
    FirstSample { regular: bool },
    Stopped,
    StoppedByTimer { secs: u64 },
    /// Protocol entered trial `index` of `total` (1-based).
    Trial {
        index: usize,
        total: usize,
        label: String,
    },
    Finished { trials: usize },
    Aborted,
    Quit,
}

impl StatusLine {
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix("STATUS ")?.trim();
        let (word, arg) = match rest.split_once(' ') {
            Some((w, a)) => (w, a.trim()),
            None => (rest, ""),
        };

        match word {
            "CONNECTED" => {
                // "<name> (<serial>)"; names may contain spaces
                let (name, serial) = match arg.rsplit_once(" (") {
                    Some((name, tail)) => (name, tail.trim_end_matches(')')),
                    None => (arg, "N/A"),
                };
                Some(StatusLine::Connected {
                    name: name.to_string(),
                    serial: serial.to_string(),
                })
            }
            "WAITING" => Some(StatusLine::Waiting),
            "STARTED" => Some(StatusLine::Started),
            "FIRST_SAMPLE" => Some(StatusLine::FirstSample {
                regular: arg != "(irregular)",
            }),
            "STOPPED" => Some(StatusLine::Stopped),
            "STOPPED_BY_TIMER" => {
                let secs = arg
                    .trim_start_matches('(')
                    .trim_end_matches(')')
                    .trim_end_matches('s')
                    .parse()
                    .ok()?;
                Some(StatusLine::StoppedByTimer { secs })
            }
            "TRIAL" => {
                let (counter, label) = arg.split_once(' ').unwrap_or((arg, ""));
                let (index, total) = counter.split_once('/')?;
                Some(StatusLine::Trial {
                    index: index.parse().ok()?,
                    total: total.parse().ok()?,
                    label: label.trim().to_string(),
                })
            }
            "FINISHED" => Some(StatusLine::Finished {
                trials: arg.parse().ok()?,
            }),
            "ABORTED" => Some(StatusLine::Aborted),
            "QUIT" => Some(StatusLine::Quit),
            _ => None,
        }
    }

    /// Print the line on stdout and flush so a supervising parent sees it at once.
    pub fn emit(&self) {
        println!("{}", self);
        std::io::stdout().flush().ok();
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLine::Connected { name, serial } => {
                write!(f, "STATUS CONNECTED {} ({})", name, serial)
            }
            StatusLine::Waiting => write!(f, "STATUS WAITING"),
            StatusLine::Started => write!(f, "STATUS STARTED"),
            StatusLine::FirstSample { regular } => write!(
                f,
                "STATUS FIRST_SAMPLE ({})",
                if *regular { "regular" } else { "irregular" }
            ),
            StatusLine::Stopped => write!(f, "STATUS STOPPED"),
            StatusLine::StoppedByTimer { secs } => write!(f, "STATUS STOPPED_BY_TIMER ({}s)", secs),
            StatusLine::Trial {
                index,
                total,
                label,
            } => write!(f, "STATUS TRIAL {}/{} {}", index, total, label),
            StatusLine::Finished { trials } => write!(f, "STATUS FINISHED {}", trials),
            StatusLine::Aborted => write!(f, "STATUS ABORTED"),
            StatusLine::Quit => write!(f, "STATUS QUIT"),
        }
    }
}
