//! Tabs: an experiment (configure, then run) or a signal viewer.

use bci_launcher::config::{ExperimentConfig, Modality};
use bci_launcher::process::{ProcessEvent, ProcessManager};
use bci_launcher::session::{SessionEvent, SessionHandle, SessionSummary, format_elapsed};
use bci_launcher::state::RunState;
use bci_launcher::status::StatusLine;

use super::form::FormState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TabKind {
    Experiment(Modality),
    Viewer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TabMode {
    Configure,
    Running,
    Completed,
}

/// Progress reported by the protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrialProgress {
    pub index: usize,
    pub total: usize,
    pub label: String,
}

pub struct TabState {
    pub title: String,
    pub kind: TabKind,
    pub mode: TabMode,
    /// Command line(s) shown above the output
    pub command: Option<String>,
    pub form_state: Option<FormState>,
    pub config: Option<ExperimentConfig>,
    pub session: Option<SessionHandle>,
    pub viewer: Option<ProcessManager>,
    /// Last (record, protocol) states seen
    pub states: (RunState, RunState),
    pub progress: Option<TrialProgress>,
    pub summary: Option<SessionSummary>,
    /// Graceful stop requested
    pub stopping: bool,
    pub output_lines: Vec<String>,
    pub scroll_offset: usize,
    /// Updated on resize
    pub cached_visible_height: usize,
    /// Off while the operator scrolls back
    pub auto_scroll_enabled: bool,
}

impl TabState {
    fn new(title: String, kind: TabKind, mode: TabMode) -> Self {
        Self {
            title,
            kind,
            mode,
            command: None,
            form_state: None,
            config: None,
            session: None,
            viewer: None,
            states: (RunState::Stopped, RunState::Stopped),
            progress: None,
            summary: None,
            stopping: false,
            output_lines: Vec::new(),
            scroll_offset: 0,
            cached_visible_height: 20,
            auto_scroll_enabled: true,
        }
    }

    pub fn experiment(title: String, modality: Modality, config: ExperimentConfig, form: FormState) -> Self {
        let mut tab = Self::new(title, TabKind::Experiment(modality), TabMode::Configure);
        tab.config = Some(config);
        tab.form_state = Some(form);
        tab
    }

    pub fn viewer(title: String, process: ProcessManager, command: String) -> Self {
        let mut tab = Self::new(title, TabKind::Viewer, TabMode::Running);
        tab.viewer = Some(process);
        tab.command = Some(command);
        tab
    }

    pub fn start_session(&mut self, handle: SessionHandle, command: String) {
        self.states = (handle.record_state.get(), handle.protocol_state.get());
        self.session = Some(handle);
        self.command = Some(command);
        self.mode = TabMode::Running;
        self.progress = None;
        self.summary = None;
        self.stopping = false;
        self.output_lines.clear();
        self.scroll_offset = 0;
        self.auto_scroll_enabled = true;
    }

    /// Back to the form after a run, keeping the log.
    pub fn reconfigure(&mut self) {
        if self.mode == TabMode::Completed && self.form_state.is_some() {
            self.mode = TabMode::Configure;
            self.session = None;
        }
    }

    pub fn is_running(&self) -> bool {
        self.mode == TabMode::Running
    }

    /// Graceful stop: abort the protocol (the recording follows) or quit the viewer.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        if let Some(ref session) = self.session {
            session.stop();
            self.stopping = true;
            self.add_output("[launcher] stop requested".to_string());
        }
        if let Some(ref mut viewer) = self.viewer {
            if let Err(e) = viewer.write_line("QUIT") {
                tracing::warn!("{:#}", e);
                viewer.kill();
            }
            self.stopping = true;
        }
    }

    /// Kill every child now.
    pub fn kill(&mut self) {
        if let Some(ref mut session) = self.session {
            session.kill();
            session.join();
        }
        if let Some(ref mut viewer) = self.viewer {
            viewer.kill();
        }
    }

    /// Drain pending events. Returns true when the tab finished during this call.
    pub fn poll(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut events = Vec::new();
        if let Some(ref session) = self.session {
            events.extend(session.events.try_iter());
        }
        let mut finished = None;
        for event in events {
            match event {
                SessionEvent::Output { role, line, at } => {
                    if let Some(StatusLine::Trial { index, total, label }) = StatusLine::parse(&line) {
                        self.progress = Some(TrialProgress { index, total, label });
                    }
                    self.add_output(format!("{} {:<8} {}", format_elapsed(at), role.label(), line));
                }
                SessionEvent::StateChanged { record, protocol } => self.states = (record, protocol),
                SessionEvent::Error(msg) => self.add_output(format!("[error] {}", msg)),
                SessionEvent::Finished(summary) => finished = Some(summary),
            }
        }
        if let Some(summary) = finished {
            self.finish_session(summary);
            return true;
        }

        let mut lines = Vec::new();
        let mut exit = None;
        if let Some(ref mut viewer) = self.viewer {
            while let Some(output) = viewer.try_recv() {
                match output.event {
                    ProcessEvent::Output(line) => lines.push(line),
                    ProcessEvent::Error(e) => lines.push(format!("[error] {}", e)),
                    ProcessEvent::Closed => {}
                }
            }
            exit = viewer.check_exit();
        }
        for line in lines {
            self.add_output(line);
        }
        if let Some(code) = exit {
            self.viewer = None;
            self.mode = TabMode::Completed;
            self.add_output(match code {
                Some(code) => format!("[viewer exited with code {}]", code),
                None => "[viewer terminated]".to_string(),
            });
            return true;
        }
        false
    }

    fn finish_session(&mut self, summary: SessionSummary) {
        self.mode = TabMode::Completed;
        self.states = (RunState::Stopped, RunState::Stopped);
        let outcome = match (summary.trials_completed, summary.aborted) {
            (Some(n), false) => format!("finished {} trials", n),
            (_, true) => "aborted".to_string(),
            (None, false) => "ended".to_string(),
        };
        self.add_output(format!(
            "[session {} after {:.1}s; protocol exit {:?}, recorder exit {:?}]",
            outcome,
            summary.duration.as_secs_f64(),
            summary.protocol_exit,
            summary.recorder_exit
        ));
        if summary.recorder_killed || summary.protocol_killed {
            self.add_output("[some processes had to be killed]".to_string());
        }
        self.summary = Some(summary);
        self.auto_scroll();
    }

    pub fn add_output(&mut self, line: String) {
        const MAX_LINES: usize = 10000;
        const TRIM_AMOUNT: usize = 1000;
        if self.output_lines.len() >= MAX_LINES {
            self.output_lines.drain(0..TRIM_AMOUNT);
            self.scroll_offset = self.scroll_offset.saturating_sub(TRIM_AMOUNT);
        }
        self.output_lines.push(sanitize_output(&line));
        self.auto_scroll();
    }

    fn max_scroll(&self) -> usize {
        self.output_lines.len().saturating_sub(self.cached_visible_height)
    }

    pub fn scroll_up(&mut self, amount: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(amount);
        self.auto_scroll_enabled = false;
    }

    /// Scrolling back to the bottom re-enables auto-scroll.
    pub fn scroll_down(&mut self, amount: usize) {
        let max_scroll = self.max_scroll();
        self.scroll_offset = (self.scroll_offset + amount).min(max_scroll);
        if self.scroll_offset >= max_scroll {
            self.auto_scroll_enabled = true;
        }
    }

    pub fn auto_scroll(&mut self) {
        if self.auto_scroll_enabled {
            self.scroll_offset = self.max_scroll();
        }
    }

    pub fn update_visible_height(&mut self, height: usize) {
        self.cached_visible_height = height;
        if self.auto_scroll_enabled {
            self.scroll_offset = self.max_scroll();
        } else {
            self.scroll_offset = self.scroll_offset.min(self.max_scroll());
        }
    }
}

/// Strip ANSI escape sequences and control characters (tabs kept).
fn sanitize_output(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                // CSI: up to the final letter
                Some('[') => {
                    chars.next();
                    for seq_char in chars.by_ref() {
                        if seq_char.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
                // OSC: up to BEL or ST
                Some(']') => {
                    chars.next();
                    for seq_char in chars.by_ref() {
                        if seq_char == '\x07' || seq_char == '\\' {
                            break;
                        }
                    }
                }
                _ => {}
            },
            c if c.is_control() && c != '\t' => {}
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_colour_codes() {
        assert_eq!(sanitize_output("\x1b[32m INFO\x1b[0m ok\r"), " INFO ok");
        assert_eq!(sanitize_output("\x1b]0;title\x07text"), "text");
    }

    #[test]
    fn scrolling_back_pauses_auto_scroll() {
        let mut tab = TabState::new("t".to_string(), TabKind::Viewer, TabMode::Running);
        tab.update_visible_height(5);
        for i in 0..20 {
            tab.add_output(format!("line {}", i));
        }
        assert_eq!(tab.scroll_offset, 15);
        tab.scroll_up(3);
        tab.add_output("more".to_string());
        assert_eq!(tab.scroll_offset, 12);
        tab.scroll_down(100);
        assert!(tab.auto_scroll_enabled);
        assert_eq!(tab.scroll_offset, 16);
    }
}
