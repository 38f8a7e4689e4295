//! Launcher state: menu, subject, amplifier scan, tabs and dialogs.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use anyhow::{Result, bail};

use bci_launcher::config::subject::{create_subject, prepare_config_files};
use bci_launcher::config::{ExperimentConfig, Modality, Settings};
use bci_launcher::lsl::{AmpInfo, ScanEvent, Scanner};
use bci_launcher::process::{ProcessManager, find_binary};

use super::file_browser::{BrowseTarget, FileBrowserState};
use super::launch;
use super::tab::{TabKind, TabMode, TabState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuAction {
    SelectSubject,
    NewSubject,
    Open(Modality),
    ToggleScan,
    StartViewer,
    StopViewer,
}

impl MenuAction {
    pub const ALL: [MenuAction; 8] = [
        MenuAction::SelectSubject,
        MenuAction::NewSubject,
        MenuAction::Open(Modality::Offline),
        MenuAction::Open(Modality::Train),
        MenuAction::Open(Modality::Online),
        MenuAction::ToggleScan,
        MenuAction::StartViewer,
        MenuAction::StopViewer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MenuAction::SelectSubject => "Select subject",
            MenuAction::NewSubject => "New subject",
            MenuAction::Open(Modality::Offline) => "Offline",
            MenuAction::Open(Modality::Train) => "Train",
            MenuAction::Open(Modality::Online) => "Online",
            MenuAction::ToggleScan => "Amplifier scan",
            MenuAction::StartViewer => "Start viewer",
            MenuAction::StopViewer => "Stop viewer",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            MenuAction::SelectSubject => "Pick a subject folder",
            MenuAction::NewSubject => "Create a subject folder from protocol templates",
            MenuAction::Open(Modality::Offline) => "Calibration run, always recorded",
            MenuAction::Open(Modality::Train) => "Train the decoder, never recorded",
            MenuAction::Open(Modality::Online) => "Closed-loop run, recording optional",
            MenuAction::ToggleScan => "Start/stop searching the network for amplifiers",
            MenuAction::StartViewer => "Signal check of the first amplifier found",
            MenuAction::StopViewer => "Stop every running viewer",
        }
    }
}

/// Pending close of a tab with running processes.
pub struct CloseConfirmation {
    pub tab_index: usize,
}

/// New-subject dialog.
pub struct NewSubjectState {
    pub name: String,
    pub protocols: Vec<String>,
    pub protocol_idx: usize,
}

impl NewSubjectState {
    pub fn protocol(&self) -> Option<&str> {
        self.protocols.get(self.protocol_idx).map(String::as_str)
    }

    pub fn cycle_protocol(&mut self, forward: bool) {
        let n = self.protocols.len();
        if n > 0 {
            self.protocol_idx = if forward {
                (self.protocol_idx + 1) % n
            } else {
                (self.protocol_idx + n - 1) % n
            };
        }
    }
}

const LOG_LINES: usize = 500;
const VIEWER_QUIT_TIMEOUT: Duration = Duration::from_secs(1);

pub struct App {
    pub settings: Settings,
    pub subject_dir: Option<PathBuf>,
    pub selected_index: usize,
    pub tabs: Vec<TabState>,
    /// `None` shows the menu
    pub active_tab_index: Option<usize>,
    pub close_confirmation: Option<CloseConfirmation>,
    pub file_browser: Option<FileBrowserState>,
    pub new_subject: Option<NewSubjectState>,
    pub error: Option<String>,
    /// Latest scan result
    pub amps: Vec<AmpInfo>,
    /// A stopped scanner stays here until its thread reports the end
    scanner: Option<Scanner>,
    scan_interval: Duration,
    pub log_lines: VecDeque<String>,
    log_rx: Receiver<String>,
    pub should_quit: bool,
}

impl App {
    pub fn new(settings: Settings, log_rx: Receiver<String>, scan_interval: Duration) -> Self {
        Self {
            settings,
            subject_dir: None,
            selected_index: 0,
            tabs: Vec::new(),
            active_tab_index: None,
            close_confirmation: None,
            file_browser: None,
            new_subject: None,
            error: None,
            amps: Vec::new(),
            scanner: None,
            scan_interval,
            log_lines: VecDeque::with_capacity(LOG_LINES),
            log_rx,
            should_quit: false,
        }
    }

    pub fn show_error(&mut self, err: impl std::fmt::Display) {
        let msg = format!("{:#}", err);
        tracing::error!("{}", msg);
        self.error = Some(msg);
    }

    pub fn selected_action(&self) -> MenuAction {
        MenuAction::ALL[self.selected_index]
    }

    pub fn select_previous(&mut self) {
        self.selected_index = self.selected_index.saturating_sub(1);
    }

    pub fn select_next(&mut self) {
        if self.selected_index + 1 < MenuAction::ALL.len() {
            self.selected_index += 1;
        }
    }

    pub fn is_in_menu(&self) -> bool {
        self.active_tab_index.is_none()
    }

    pub fn active_tab_mut(&mut self) -> Option<&mut TabState> {
        self.active_tab_index.and_then(|idx| self.tabs.get_mut(idx))
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.as_ref().is_some_and(Scanner::is_running)
    }

    /// Run the highlighted menu entry; failures go to the error dialog.
    pub fn run_selected(&mut self) {
        let action = self.selected_action();
        let result = match action {
            MenuAction::SelectSubject => {
                self.browse_subject();
                Ok(())
            }
            MenuAction::NewSubject => self.open_new_subject(),
            MenuAction::Open(modality) => self.open_experiment(modality),
            MenuAction::ToggleScan => self.toggle_scan(),
            MenuAction::StartViewer => self.start_viewer(),
            MenuAction::StopViewer => {
                self.stop_viewers();
                Ok(())
            }
        };
        if let Err(e) = result {
            self.show_error(e);
        }
    }

    fn browse_subject(&mut self) {
        let start = self
            .subject_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        self.file_browser = Some(FileBrowserState::new(
            &start,
            &self.settings.scripts,
            true,
            BrowseTarget::SubjectDir,
        ));
    }

    /// Browse for a path parameter of the active tab's form.
    pub fn browse_field(&mut self, field_index: usize, current: &str, select_dir: bool) {
        let fallback = self.subject_dir.clone().unwrap_or_else(|| self.settings.scripts.clone());
        self.file_browser = Some(FileBrowserState::new(
            current,
            &fallback,
            select_dir,
            BrowseTarget::Field(field_index),
        ));
    }

    /// Apply a path picked in the browser.
    pub fn browser_picked(&mut self, path: PathBuf) {
        let Some(browser) = self.file_browser.take() else {
            return;
        };
        match browser.target {
            BrowseTarget::SubjectDir => self.set_subject(path),
            BrowseTarget::Field(index) => {
                if let Some(form) = self.active_tab_mut().and_then(|t| t.form_state.as_mut()) {
                    form.set_path(index, path.display().to_string());
                }
            }
        }
    }

    pub fn set_subject(&mut self, dir: PathBuf) {
        tracing::info!("Subject folder: {}", dir.display());
        self.subject_dir = Some(dir);
    }

    fn open_new_subject(&mut self) -> Result<()> {
        let protocols = self.settings.protocols();
        if protocols.is_empty() {
            bail!("No protocol in {}", self.settings.config_files_dir().display());
        }
        self.new_subject = Some(NewSubjectState {
            name: String::new(),
            protocols,
            protocol_idx: 0,
        });
        Ok(())
    }

    pub fn confirm_new_subject(&mut self) {
        let Some(dialog) = self.new_subject.take() else {
            return;
        };
        let Some(protocol) = dialog.protocol() else {
            return;
        };
        match create_subject(&self.settings, &dialog.name, protocol) {
            Ok(dir) => self.set_subject(dir),
            Err(e) => {
                self.show_error(e);
                self.new_subject = Some(dialog);
            }
        }
    }

    /// Load the subject's config for `modality` into a new tab.
    pub fn open_experiment(&mut self, modality: Modality) -> Result<()> {
        let Some(subject_dir) = self.subject_dir.clone() else {
            bail!("Select or create a subject first");
        };
        let (subject_file, structure_file) = prepare_config_files(&self.settings, &subject_dir, modality)?;
        let config = ExperimentConfig::load(&structure_file, &subject_file)?;

        let subject = subject_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let title = format!("{} {}", modality, subject);
        let form = launch::build_config_form(&title, &config, modality, &self.amps);
        tracing::info!("Loaded {}", subject_file.display());

        self.tabs.push(TabState::experiment(title, modality, config, form));
        self.active_tab_index = Some(self.tabs.len() - 1);
        Ok(())
    }

    /// Run the active experiment tab with its form values.
    pub fn run_active_tab(&mut self) {
        let settings = self.settings.clone();
        let amps = self.amps.clone();
        let Some(tab) = self.active_tab_mut() else {
            return;
        };
        let TabKind::Experiment(modality) = tab.kind else {
            return;
        };
        let (Some(form), Some(config)) = (tab.form_state.as_mut(), tab.config.as_mut()) else {
            return;
        };

        if let Err(e) = launch::apply_form(form, config) {
            form.error_message = Some(e.to_string());
            return;
        }
        let (amp, record) = launch::launch_choice(form, &amps);
        match launch::start_session(&settings, config, modality, amp, record) {
            Ok((handle, command)) => tab.start_session(handle, command),
            Err(e) => {
                form.error_message = Some(format!("{:#}", e));
                tracing::error!("{:#}", e);
            }
        }
    }

    /// Ctrl+S: apply the form and save a timestamped copy of the subject config.
    pub fn save_active_config(&mut self) {
        let Some(tab) = self.active_tab_mut() else {
            return;
        };
        let (Some(form), Some(config)) = (tab.form_state.as_mut(), tab.config.as_mut()) else {
            return;
        };
        let saved = launch::apply_form(form, config).and_then(|()| config.save_timestamped());
        match saved {
            Ok(path) => form.info_message = Some(format!("Saved to {}", path.display())),
            Err(e) => form.error_message = Some(e.to_string()),
        }
    }

    fn toggle_scan(&mut self) -> Result<()> {
        if self.is_scanning() {
            tracing::info!("Stopping amplifier scan");
            if let Some(scanner) = &self.scanner {
                scanner.stop();
            }
            return Ok(());
        }
        // dropping the old scanner stops it and closes its channel
        self.scanner = Some(Scanner::start(self.scan_interval, false));
        tracing::info!("Searching for amplifiers every {:.1}s", self.scan_interval.as_secs_f64());
        Ok(())
    }

    fn start_viewer(&mut self) -> Result<()> {
        let Some(amp) = self.amps.first().cloned() else {
            bail!("No amplifier known: run the amplifier scan first");
        };
        let program = find_binary("bci-viewer");
        let args = vec![
            "--amp-name".to_string(),
            amp.name.clone(),
            "--amp-serial".to_string(),
            amp.serial.clone(),
        ];
        let process = ProcessManager::spawn(&program, &args, "viewer")?;
        let command = format!("{} {}", program.display(), args.join(" "));
        self.tabs.push(TabState::viewer(format!("Viewer {}", amp.name), process, command));
        self.active_tab_index = Some(self.tabs.len() - 1);
        Ok(())
    }

    fn stop_viewers(&mut self) {
        for tab in self.tabs.iter_mut().filter(|t| t.kind == TabKind::Viewer) {
            tab.stop();
        }
    }

    /// Drain scan results, log lines and child events. Returns true when a redraw is needed.
    pub fn tick(&mut self) -> bool {
        let mut changed = false;

        while let Ok(line) = self.log_rx.try_recv() {
            if self.log_lines.len() == LOG_LINES {
                self.log_lines.pop_front();
            }
            self.log_lines.push_back(line);
        }

        let scan_events: Vec<ScanEvent> = self.scanner.as_ref().map(|s| s.events().collect()).unwrap_or_default();
        for event in scan_events {
            match event {
                ScanEvent::Found(amps) => {
                    for tab in &mut self.tabs {
                        if tab.mode == TabMode::Configure
                            && let Some(form) = tab.form_state.as_mut()
                        {
                            launch::update_amp_options(form, &amps);
                        }
                    }
                    self.amps = amps;
                }
                ScanEvent::Error(e) => tracing::warn!("Amplifier scan: {}", e),
                ScanEvent::Stopped => {
                    self.scanner = None;
                    changed = true;
                }
            }
        }

        for tab in &mut self.tabs {
            changed |= tab.poll();
        }
        changed
    }

    pub fn next_tab(&mut self) {
        if self.tabs.is_empty() {
            return;
        }
        self.active_tab_index = match self.active_tab_index {
            None => Some(0),
            Some(idx) if idx + 1 < self.tabs.len() => Some(idx + 1),
            Some(_) => None,
        };
    }

    pub fn prev_tab(&mut self) {
        if self.tabs.is_empty() {
            return;
        }
        self.active_tab_index = match self.active_tab_index {
            None => Some(self.tabs.len() - 1),
            Some(0) => None,
            Some(idx) => Some(idx - 1),
        };
    }

    /// Close the active tab, asking first when it still runs processes.
    pub fn request_close_active_tab(&mut self) {
        let Some(idx) = self.active_tab_index else { return };
        let Some(tab) = self.tabs.get(idx) else { return };
        if tab.is_running() {
            self.close_confirmation = Some(CloseConfirmation { tab_index: idx });
        } else {
            self.close_tab(idx);
        }
    }

    pub fn close_tab(&mut self, index: usize) {
        if index >= self.tabs.len() {
            return;
        }
        self.tabs[index].kill();
        self.tabs.remove(index);
        self.close_confirmation = None;

        self.active_tab_index = match self.active_tab_index {
            _ if self.tabs.is_empty() => None,
            Some(active) if index < active => Some(active - 1),
            Some(active) if active >= self.tabs.len() => Some(self.tabs.len() - 1),
            other => other,
        };
    }

    pub fn confirm_close(&mut self) {
        if let Some(conf) = self.close_confirmation.take() {
            self.close_tab(conf.tab_index);
        }
    }

    pub fn cancel_close(&mut self) {
        self.close_confirmation = None;
    }

    pub fn has_running_tabs(&self) -> bool {
        self.tabs.iter().any(TabState::is_running)
    }

    /// Stop the scanner and kill whatever still runs.
    pub fn shutdown(&mut self) {
        if let Some(scanner) = self.scanner.take() {
            scanner.stop();
        }
        for tab in &mut self.tabs {
            // viewers get a moment to close their inlet
            if let Some(ref mut viewer) = tab.viewer
                && viewer.write_line("QUIT").is_ok()
                && viewer.wait_timeout(VIEWER_QUIT_TIMEOUT).is_none()
            {
                tracing::warn!("Viewer did not quit, killing it");
            }
            tab.kill();
        }
    }
}
