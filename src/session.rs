//! Session supervisor: runs the protocol (and optionally the recorder) as
//! child processes and drives them from two run flags.
//!
//! ```text
//! with recording                          without recording
//! record   := Started                     record   := Stopped
//! protocol := Waiting                     protocol := Started
//!
//! recorder  STATUS CONNECTED  -> send START to recorder
//! recorder  STATUS STARTED    -> protocol Waiting -> Started
//! protocol  becomes Started   -> send START to protocol
//! protocol  becomes Stopped   -> send STOP to protocol (operator stop)
//! protocol  exits             -> protocol := Stopped, record := Stopped
//! recorder  exits early       -> protocol := Stopped (abort)
//! record    becomes Stopped   -> send QUIT to recorder, kill after the stop timeout
//! every child exited          -> Finished
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::commands::Command;
use crate::config::Modality;
use crate::process::{ProcessEvent, ProcessManager, ProcessOutput};
use crate::state::{RunState, SharedState};
use crate::status::StatusLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Recorder,
    Protocol,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Recorder => "recorder",
            Role::Protocol => "protocol",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "recorder" => Some(Role::Recorder),
            "protocol" => Some(Role::Protocol),
            _ => None,
        }
    }
}

/// A program and its arguments.
#[derive(Debug, Clone)]
pub struct ChildCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub modality: Modality,
    pub protocol: ChildCommand,
    /// Run snapshot handed to the protocol.
    pub snapshot: PathBuf,
    /// Recorder to run alongside, `None` when not recording.
    pub recorder: Option<ChildCommand>,
    /// How long a child gets to exit after QUIT/STOP before it is killed.
    pub stop_timeout: Duration,
}

impl SessionPlan {
    pub fn new(modality: Modality, protocol: ChildCommand, snapshot: PathBuf) -> Self {
        Self {
            modality,
            protocol,
            snapshot,
            recorder: None,
            stop_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_recorder(mut self, recorder: ChildCommand) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub recorder_exit: Option<i32>,
    pub protocol_exit: Option<i32>,
    /// Trial count reported by `STATUS FINISHED`.
    pub trials_completed: Option<usize>,
    pub aborted: bool,
    pub recorder_killed: bool,
    pub protocol_killed: bool,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Output { role: Role, line: String, at: Duration },
    StateChanged { record: RunState, protocol: RunState },
    Error(String),
    Finished(SessionSummary),
}

/// `[+MM:SS.mmm]` relative timestamp for session logs.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_millis = elapsed.as_millis();
    let seconds = (total_millis / 1000) % 60;
    let minutes = (total_millis / 60000) % 60;
    let millis = total_millis % 1000;
    format!("[+{:02}:{:02}.{:03}]", minutes, seconds, millis)
}

pub struct SessionHandle {
    pub record_state: SharedState,
    pub protocol_state: SharedState,
    pub events: Receiver<SessionEvent>,
    kill: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Graceful stop: the protocol is aborted and the recorder finishes.
    pub fn stop(&self) {
        self.protocol_state.set(RunState::Stopped);
    }

    /// Kill every child at once.
    pub fn kill(&self) {
        self.kill.store(true, Ordering::SeqCst);
        self.protocol_state.set(RunState::Stopped);
        self.record_state.set(RunState::Stopped);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Block until the supervisor has exited.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.is_finished() {
            self.kill();
        }
    }
}

pub struct Session;

impl Session {
    /// Spawn the children and the supervisor thread.
    pub fn start(plan: SessionPlan) -> Result<SessionHandle> {
        let record_state = SharedState::default();
        let protocol_state = SharedState::default();
        let (child_tx, child_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        let recorder = match plan.recorder {
            Some(ref cmd) => {
                record_state.set(RunState::Started);
                protocol_state.set(RunState::Waiting);
                Some(ProcessManager::spawn_into(
                    &cmd.program,
                    &cmd.args,
                    Role::Recorder.label(),
                    child_tx.clone(),
                )?)
            }
            None => {
                record_state.set(RunState::Stopped);
                protocol_state.set(RunState::Started);
                None
            }
        };

        let mut protocol_args = plan.protocol.args.clone();
        protocol_args.extend(["--config".to_string(), plan.snapshot.display().to_string()]);
        let protocol = ProcessManager::spawn_into(
            &plan.protocol.program,
            &protocol_args,
            Role::Protocol.label(),
            child_tx.clone(),
        )?;

        tracing::info!(
            "Session started ({}, recording {})",
            plan.modality,
            if recorder.is_some() { "on" } else { "off" }
        );

        let has_recorder = recorder.is_some();
        let kill = Arc::new(AtomicBool::new(false));
        let supervisor = Supervisor {
            record_state: record_state.clone(),
            protocol_state: protocol_state.clone(),
            recorder,
            protocol: Some(protocol),
            child_rx,
            _child_tx: child_tx,
            events: event_tx,
            kill: kill.clone(),
            stop_timeout: plan.stop_timeout,
            start: Instant::now(),
            summary: SessionSummary::default(),
            recorder_quit_at: None,
            protocol_stop_at: None,
            open_pipes: 2 * (1 + usize::from(has_recorder)),
        };

        let thread = thread::Builder::new()
            .name("session".to_string())
            .spawn(move || supervisor.run())?;

        Ok(SessionHandle {
            record_state,
            protocol_state,
            events: event_rx,
            kill,
            thread: Some(thread),
        })
    }
}

struct Supervisor {
    record_state: SharedState,
    protocol_state: SharedState,
    recorder: Option<ProcessManager>,
    protocol: Option<ProcessManager>,
    child_rx: Receiver<ProcessOutput>,
    // keeps the channel open while children come and go
    _child_tx: Sender<ProcessOutput>,
    events: Sender<SessionEvent>,
    kill: Arc<AtomicBool>,
    stop_timeout: Duration,
    start: Instant,
    summary: SessionSummary,
    recorder_quit_at: Option<Instant>,
    protocol_stop_at: Option<Instant>,
    /// stdout/stderr pipes not yet at end of file
    open_pipes: usize,
}

impl Supervisor {
    fn emit(&self, event: SessionEvent) {
        // the launcher may have gone away; the session still winds down
        let _ = self.events.send(event);
    }

    fn send(child: &mut Option<ProcessManager>, command: Command) {
        if let Some(process) = child.as_mut()
            && let Err(e) = process.write_line(&command.as_line())
        {
            tracing::warn!("{:#}", e);
        }
    }

    fn run(mut self) {
        let mut last = (RunState::Stopped, RunState::Stopped);

        loop {
            match self.child_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(output) => self.on_output(output),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }

            if self.kill.load(Ordering::SeqCst) {
                self.kill_all();
            }

            let now = (self.record_state.get(), self.protocol_state.get());
            if now != last {
                self.on_state_change(last, now);
                self.emit(SessionEvent::StateChanged {
                    record: now.0,
                    protocol: now.1,
                });
                last = now;
            }

            self.check_exits();
            self.enforce_deadlines();

            if self.recorder.is_none() && self.protocol.is_none() {
                break;
            }
        }

        // late output still belongs in the log
        let deadline = Instant::now() + Duration::from_millis(500);
        while self.open_pipes > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.child_rx.recv_timeout(left) {
                Ok(output) => self.on_output(output),
                Err(_) => break,
            }
        }

        self.summary.duration = self.start.elapsed();
        tracing::info!("Session finished after {:.1}s", self.summary.duration.as_secs_f64());
        let summary = self.summary.clone();
        self.emit(SessionEvent::Finished(summary));
    }

    fn on_output(&mut self, output: ProcessOutput) {
        let Some(role) = Role::from_label(&output.label) else {
            return;
        };
        let line = match output.event {
            ProcessEvent::Output(line) => line,
            ProcessEvent::Error(e) => {
                self.emit(SessionEvent::Error(format!("{}: {}", role.label(), e)));
                return;
            }
            ProcessEvent::Closed => {
                self.open_pipes = self.open_pipes.saturating_sub(1);
                return;
            }
        };

        if let Some(status) = StatusLine::parse(&line) {
            match (role, status) {
                (Role::Recorder, StatusLine::Connected { .. }) => {
                    if self.record_state.is(RunState::Started) {
                        Self::send(&mut self.recorder, Command::Start);
                    }
                }
                (Role::Recorder, StatusLine::Started) => {
                    self.protocol_state.transition(RunState::Waiting, RunState::Started);
                }
                (Role::Protocol, StatusLine::Finished { trials }) => {
                    self.summary.trials_completed = Some(trials);
                }
                (Role::Protocol, StatusLine::Aborted) => self.summary.aborted = true,
                _ => {}
            }
        }

        self.emit(SessionEvent::Output {
            role,
            line,
            at: self.start.elapsed(),
        });
    }

    fn on_state_change(&mut self, before: (RunState, RunState), now: (RunState, RunState)) {
        let (_, protocol_before) = before;
        let (record, protocol) = now;

        if protocol != protocol_before {
            match protocol {
                RunState::Started => Self::send(&mut self.protocol, Command::Start),
                RunState::Stopped if self.protocol.is_some() && self.protocol_stop_at.is_none() => {
                    tracing::info!("Stopping protocol");
                    Self::send(&mut self.protocol, Command::Stop);
                    self.protocol_stop_at = Some(Instant::now());
                }
                _ => {}
            }
        }

        // the recording ends with the protocol, whatever stopped it
        if protocol == RunState::Stopped && record != RunState::Stopped {
            self.record_state.set(RunState::Stopped);
        }

        if self.record_state.is(RunState::Stopped) && self.recorder.is_some() && self.recorder_quit_at.is_none() {
            tracing::info!("Stopping recorder");
            Self::send(&mut self.recorder, Command::Quit);
            self.recorder_quit_at = Some(Instant::now());
        }
    }

    fn check_exits(&mut self) {
        if let Some(process) = self.protocol.as_mut()
            && let Some(code) = process.check_exit()
        {
            tracing::info!("Protocol exited with {:?}", code);
            self.summary.protocol_exit = code;
            self.protocol = None;
            self.protocol_state.set(RunState::Stopped);
            self.record_state.set(RunState::Stopped);
        }

        if let Some(process) = self.recorder.as_mut()
            && let Some(code) = process.check_exit()
        {
            self.summary.recorder_exit = code;
            self.recorder = None;
            if self.recorder_quit_at.is_none() {
                let msg = format!("Recorder exited unexpectedly ({:?}); aborting the protocol", code);
                tracing::error!("{}", msg);
                self.emit(SessionEvent::Error(msg));
            }
            self.record_state.set(RunState::Stopped);
            self.protocol_state.set(RunState::Stopped);
        }
    }

    fn enforce_deadlines(&mut self) {
        let timeout = self.stop_timeout;
        if let Some(at) = self.recorder_quit_at
            && at.elapsed() >= timeout
            && let Some(mut process) = self.recorder.take()
        {
            let msg = format!("Recorder did not stop within {}s and was killed", timeout.as_secs_f64());
            tracing::error!("{}", msg);
            process.kill();
            self.summary.recorder_killed = true;
            self.emit(SessionEvent::Error(msg));
        }
        if let Some(at) = self.protocol_stop_at
            && at.elapsed() >= timeout
            && let Some(mut process) = self.protocol.take()
        {
            let msg = format!("Protocol did not stop within {}s and was killed", timeout.as_secs_f64());
            tracing::error!("{}", msg);
            process.kill();
            self.summary.protocol_killed = true;
            self.summary.aborted = true;
            self.emit(SessionEvent::Error(msg));
        }
    }

    fn kill_all(&mut self) {
        if let Some(mut process) = self.protocol.take() {
            process.kill();
            self.summary.protocol_killed = true;
            self.summary.aborted = true;
        }
        if let Some(mut process) = self.recorder.take() {
            process.kill();
            self.summary.recorder_killed = true;
        }
        self.protocol_state.set(RunState::Stopped);
        self.record_state.set(RunState::Stopped);
    }
}
