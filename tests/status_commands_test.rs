use std::io::Cursor;

use bci_launcher::commands::{Command, handle_protocol_commands};
use bci_launcher::state::{RunState, SharedState};
use bci_launcher::status::StatusLine;

#[test]
fn status_lines_parse_from_their_display() {
    let lines = [
        StatusLine::Connected {
            name: "Live Amp 32".to_string(),
            serial: "LA-0042".to_string(),
        },
        StatusLine::Waiting,
        StatusLine::FirstSample { regular: false },
        StatusLine::StoppedByTimer { secs: 30 },
        StatusLine::Trial {
            index: 3,
            total: 40,
            label: "LEFT_HAND".to_string(),
        },
        StatusLine::Finished { trials: 40 },
        StatusLine::Aborted,
    ];
    for line in lines {
        assert_eq!(StatusLine::parse(&line.to_string()), Some(line));
    }
}

#[test]
fn other_output_is_not_status() {
    assert_eq!(StatusLine::parse("Recording started"), None);
    assert_eq!(StatusLine::parse("STATUS"), None);
    assert_eq!(StatusLine::parse("STATUS TRIAL x/y LEFT"), None);
    assert_eq!(StatusLine::parse("STATUS WILL STOP AFTER 5s"), None);
}

#[test]
fn connected_without_serial() {
    assert_eq!(
        StatusLine::parse("STATUS CONNECTED Sim"),
        Some(StatusLine::Connected {
            name: "Sim".to_string(),
            serial: "N/A".to_string(),
        })
    );
}

#[test]
fn commands_are_case_insensitive() {
    assert_eq!(Command::parse("start"), Ok(Some(Command::Start)));
    assert_eq!(Command::parse("  Stop "), Ok(Some(Command::Stop)));
    assert_eq!(Command::parse("stop_after 12"), Ok(Some(Command::StopAfter(12))));
    assert_eq!(Command::parse(""), Ok(None));
    assert!(Command::parse("STOP_AFTER soon").is_err());
    assert!(Command::parse("PAUSE").is_err());
}

#[test]
fn command_errors_name_the_problem() {
    assert_eq!(
        Command::parse("STOP_AFTER"),
        Err("STOP_AFTER needs a number of seconds".to_string())
    );
    assert_eq!(Command::parse("stop_after   "), Err("STOP_AFTER needs a number of seconds".to_string()));
    assert_eq!(Command::parse("STOP_AFTER soon"), Err("bad STOP_AFTER arg: soon".to_string()));
    assert_eq!(Command::parse("STOP_AFTER\t30"), Ok(Some(Command::StopAfter(30))));
    assert_eq!(Command::parse("START now"), Err("START takes no argument".to_string()));
    assert_eq!(Command::parse("PAUSE"), Err("unknown command: PAUSE".to_string()));
    assert_eq!(Command::StopAfter(5).as_line(), "STOP_AFTER 5");
}

#[test]
fn protocol_starts_only_when_waiting() {
    let state = SharedState::new(RunState::Waiting);
    let watcher = state.clone();
    // end of input stops the run after START
    handle_protocol_commands(Cursor::new("START\n"), state);
    assert_eq!(watcher.get(), RunState::Stopped);

    let state = SharedState::new(RunState::Stopped);
    let watcher = state.clone();
    handle_protocol_commands(Cursor::new("START\nQUIT\n"), state);
    assert_eq!(watcher.get(), RunState::Stopped);
}
