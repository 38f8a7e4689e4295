//! Session supervision against small shell children standing in for the
//! recorder and the protocol.
#![cfg(unix)]

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use bci_launcher::config::subject::{create_subject, prepare_config_files};
use bci_launcher::config::{ExperimentConfig, Modality, Settings};
use bci_launcher::process::{ProcessEvent, ProcessManager};
use bci_launcher::session::{ChildCommand, Role, Session, SessionEvent, SessionHandle, SessionPlan, SessionSummary};
use bci_launcher::state::RunState;

fn sh(script: &str) -> ChildCommand {
    ChildCommand {
        program: PathBuf::from("/bin/sh"),
        // the protocol's `--config <snapshot>` lands in $1 $2
        args: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
    }
}

/// Collect events until the session finishes.
fn drain(handle: &mut SessionHandle, mut on_event: impl FnMut(&SessionEvent, &SessionHandle)) -> (Vec<SessionEvent>, SessionSummary) {
    let deadline = Instant::now() + Duration::from_secs(20);
    let mut events = Vec::new();
    while Instant::now() < deadline {
        let Ok(event) = handle.events.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        on_event(&event, handle);
        if let SessionEvent::Finished(ref summary) = event {
            let summary = summary.clone();
            events.push(event);
            handle.join();
            return (events, summary);
        }
        events.push(event);
    }
    panic!("session did not finish: {:?}", events);
}

fn output_lines(events: &[SessionEvent], role: Role) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Output { role: r, line, .. } if *r == role => Some(line.clone()),
            _ => None,
        })
        .collect()
}

fn errors(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Error(msg) => Some(msg.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn process_output_and_exit_code() {
    let cmd = sh(r#"read line; echo "echo $line"; echo oops >&2; exit 4"#);
    let mut process = ProcessManager::spawn(&cmd.program, &cmd.args, "child").unwrap();
    process.write_line("hello").unwrap();
    assert_eq!(process.wait_timeout(Duration::from_secs(10)), Some(Some(4)));

    let mut lines = Vec::new();
    let mut closed = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while closed < 2 && Instant::now() < deadline {
        match process.try_recv().map(|o| o.event) {
            Some(ProcessEvent::Output(line)) => lines.push(line),
            Some(ProcessEvent::Closed) => closed += 1,
            Some(ProcessEvent::Error(e)) => panic!("{}", e),
            None => std::thread::sleep(Duration::from_millis(10)),
        }
    }
    lines.sort();
    assert_eq!(lines, ["echo hello", "oops"]);
}

const WAIT_FOR_STOP: &str = r#"while read cmd; do [ "$cmd" = STOP ] && break; done; echo "STATUS ABORTED""#;

#[test]
fn protocol_alone_starts_at_once() {
    let plan = SessionPlan::new(
        Modality::Train,
        sh(r#"read cmd; echo "got $cmd $1"; echo "STATUS FINISHED 3""#),
        PathBuf::from("run.json"),
    );
    let mut handle = Session::start(plan).unwrap();
    let (events, summary) = drain(&mut handle, |_, _| {});

    assert_eq!(output_lines(&events, Role::Protocol)[0], "got START --config");
    assert_eq!(summary.trials_completed, Some(3));
    assert_eq!(summary.protocol_exit, Some(0));
    assert!(!summary.aborted);
    assert!(errors(&events).is_empty(), "{:?}", errors(&events));
}

#[test]
fn protocol_waits_for_the_recorder() {
    let recorder = sh(r#"echo "STATUS CONNECTED Sim (1)"
read cmd; [ "$cmd" = START ] && echo "STATUS STARTED"
read cmd; echo "recorder got $cmd""#);
    let plan = SessionPlan::new(
        Modality::Offline,
        sh(r#"echo "STATUS WAITING"; read cmd; echo "STATUS FINISHED 2""#),
        PathBuf::from("run.json"),
    )
    .with_recorder(recorder);

    let mut handle = Session::start(plan).unwrap();
    assert_eq!(handle.record_state.get(), RunState::Started);
    assert_eq!(handle.protocol_state.get(), RunState::Waiting);

    let (events, summary) = drain(&mut handle, |_, _| {});
    assert!(output_lines(&events, Role::Recorder).contains(&"recorder got QUIT".to_string()));
    assert_eq!(summary.trials_completed, Some(2));
    assert_eq!(summary.recorder_exit, Some(0));
    assert!(!summary.recorder_killed);
    assert!(errors(&events).is_empty(), "{:?}", errors(&events));

    // the protocol was released only once the recorder was live
    let started = events.iter().position(|e| {
        matches!(e, SessionEvent::StateChanged { protocol: RunState::Started, .. })
    });
    let recorder_started = events.iter().position(|e| {
        matches!(e, SessionEvent::Output { role: Role::Recorder, line, .. } if line == "STATUS STARTED")
    });
    assert!(recorder_started.is_some() && started > recorder_started);
}

#[test]
fn operator_stop_aborts_the_protocol() {
    let plan = SessionPlan::new(Modality::Train, sh(WAIT_FOR_STOP), PathBuf::from("run.json"));
    let mut handle = Session::start(plan).unwrap();

    let (_, summary) = drain(&mut handle, |event, handle| {
        if let SessionEvent::StateChanged {
            protocol: RunState::Started,
            ..
        } = event
        {
            handle.stop();
        }
    });
    assert!(summary.aborted);
    assert!(!summary.protocol_killed);
    assert_eq!(handle.protocol_state.get(), RunState::Stopped);
}

#[test]
fn recorder_crash_aborts_the_run() {
    let plan = SessionPlan::new(Modality::Offline, sh(WAIT_FOR_STOP), PathBuf::from("run.json"))
        .with_recorder(sh("exit 3"));
    let mut handle = Session::start(plan).unwrap();

    let (events, summary) = drain(&mut handle, |_, _| {});
    assert_eq!(summary.recorder_exit, Some(3));
    assert!(summary.aborted);
    assert!(errors(&events).iter().any(|e| e.contains("Recorder exited unexpectedly")));
}

#[test]
fn unresponsive_children_are_killed() {
    let mut plan = SessionPlan::new(Modality::Train, sh("trap '' TERM; exec sleep 30"), PathBuf::from("run.json"));
    plan.stop_timeout = Duration::from_millis(300);
    let mut handle = Session::start(plan).unwrap();

    let started = Instant::now();
    let (events, summary) = drain(&mut handle, |event, handle| {
        if let SessionEvent::StateChanged {
            protocol: RunState::Started,
            ..
        } = event
        {
            handle.stop();
        }
    });
    assert!(summary.protocol_killed);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(errors(&events).iter().any(|e| e.contains("was killed")));
}

#[test]
fn kill_ends_everything() {
    let plan = SessionPlan::new(Modality::Offline, sh("exec sleep 30"), PathBuf::from("run.json"))
        .with_recorder(sh("exec sleep 30"));
    let mut handle = Session::start(plan).unwrap();
    handle.kill();

    let (_, summary) = drain(&mut handle, |_, _| {});
    assert!(summary.protocol_killed);
    assert!(summary.recorder_killed);
    assert!(handle.is_finished());
}

fn shipped_settings(tmp: &TempDir) -> Settings {
    Settings::new(env!("CARGO_MANIFEST_DIR"), tmp.path().join("data"), tmp.path().join("scripts"))
}

/// Train-modality snapshot with instant phases.
fn quick_snapshot(tmp: &TempDir) -> PathBuf {
    let settings = shipped_settings(tmp);
    let subject_dir = create_subject(&settings, "S01", "mi").unwrap();
    let (subject, structure) = prepare_config_files(&settings, &subject_dir, Modality::Train).unwrap();
    let mut config = ExperimentConfig::load(&structure, &subject).unwrap();
    config.set_param("TRIALS_NB", serde_json::json!(3)).unwrap();
    config
        .set_param("TIMINGS", serde_json::json!({"INIT": 0, "GAP": 0, "READY": 0, "DIR": 0}))
        .unwrap();
    config.check(None).unwrap();
    config
        .write_run_snapshot(&settings.record_dir(&subject_dir), Modality::Train)
        .unwrap()
}

#[test]
fn protocol_binary_runs_a_snapshot() {
    let tmp = TempDir::new().unwrap();
    let snapshot = quick_snapshot(&tmp);

    let mut child = Command::new(env!("CARGO_BIN_EXE_bci-protocol"))
        .args(["--dry-run", "--config"])
        .arg(&snapshot)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    let stdout = BufReader::new(child.stdout.take().unwrap());

    let mut lines = Vec::new();
    for line in stdout.lines() {
        let line = line.unwrap();
        if line == "STATUS WAITING" {
            writeln!(stdin, "START").unwrap();
        }
        let done = line.starts_with("STATUS FINISHED") || line == "STATUS ABORTED";
        lines.push(line);
        if done {
            break;
        }
    }
    drop(stdin);
    assert!(child.wait().unwrap().success());

    assert_eq!(lines.last().map(String::as_str), Some("STATUS FINISHED 3"));
    assert_eq!(lines.iter().filter(|l| l.starts_with("STATUS TRIAL")).count(), 3);
}

#[test]
fn session_drives_the_protocol_binary() {
    let tmp = TempDir::new().unwrap();
    let snapshot = quick_snapshot(&tmp);

    let protocol = ChildCommand {
        program: PathBuf::from(env!("CARGO_BIN_EXE_bci-protocol")),
        args: vec!["--dry-run".to_string()],
    };
    let mut handle = Session::start(SessionPlan::new(Modality::Train, protocol, snapshot)).unwrap();
    let (events, summary) = drain(&mut handle, |_, _| {});

    assert_eq!(summary.trials_completed, Some(3), "{:?}", events);
    assert_eq!(summary.protocol_exit, Some(0));
    assert!(!summary.aborted);
}
