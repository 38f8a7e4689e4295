//! Amplifier discovery over Lab Streaming Layer.
//!
//! Amplifiers are LSL streams; markers streams are skipped when searching,
//! and the hardware serial number is read from the stream description
//! (`<desc><acquisition><serial_number>`), `"N/A"` when absent.

pub mod record;

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::state::{RunState, SharedState};

pub const NO_SERIAL: &str = "N/A";

/// What the launcher and the recorder know about an amplifier stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmpInfo {
    pub name: String,
    pub stream_type: String,
    pub serial: String,
    pub channels: usize,
    pub srate: f64,
    pub channel_format: String,
    pub source_id: String,
    pub hostname: String,
    pub uid: String,
}

impl AmpInfo {
    pub fn from_stream_info(info: &mut lsl::StreamInfo) -> Self {
        let serial = info
            .to_xml()
            .ok()
            .and_then(|xml| extract_serial_number(&xml))
            .unwrap_or_else(|| NO_SERIAL.to_string());

        Self {
            name: info.stream_name().to_string(),
            stream_type: info.stream_type().to_string(),
            serial,
            channels: info.channel_count() as usize,
            srate: info.nominal_srate(),
            channel_format: format!("{:?}", info.channel_format()),
            source_id: info.source_id().to_string(),
            hostname: info.hostname().to_string(),
            uid: info.uid().to_string(),
        }
    }

    /// `"name (serial)"`, as shown in amplifier lists.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.serial)
    }

    pub fn is_markers(&self) -> bool {
        self.stream_type.eq_ignore_ascii_case("Markers")
    }

    pub fn is_eeg(&self) -> bool {
        self.stream_type.eq_ignore_ascii_case("EEG")
    }

    /// Match by name and serial; `None` (or `"N/A"` for the serial) matches anything.
    pub fn matches(&self, name: Option<&str>, serial: Option<&str>) -> bool {
        let name_ok = name.is_none_or(|n| n == self.name);
        let serial_ok = serial.is_none_or(|s| s == NO_SERIAL || s == self.serial);
        name_ok && serial_ok
    }
}

/// Parse `"name (serial)"` back into its parts.
pub fn parse_amp_label(label: &str) -> (String, Option<String>) {
    match label.trim().rsplit_once(" (") {
        Some((name, rest)) if rest.ends_with(')') => {
            let serial = rest.trim_end_matches(')');
            (name.to_string(), Some(serial.to_string()))
        }
        _ => (label.trim().to_string(), None),
    }
}

/// Serial number from a stream-info XML document.
pub fn extract_serial_number(xml: &str) -> Option<String> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    const PATH: [&[u8]; 3] = [b"desc", b"acquisition", b"serial_number"];
    let mut stack: Vec<Vec<u8>> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(e.name().as_ref().to_vec()),
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(e)) => {
                let in_serial = stack.len() >= PATH.len()
                    && stack[stack.len() - PATH.len()..]
                        .iter()
                        .zip(PATH.iter())
                        .all(|(a, b)| a.as_slice() == *b);
                if in_serial {
                    let text = e.unescape().ok()?.trim().to_string();
                    return (!text.is_empty()).then_some(text);
                }
            }
            Ok(Event::Eof) => return None,
            Err(e) => {
                tracing::warn!("Error parsing LSL XML: {}", e);
                return None;
            }
            _ => {}
        }
    }
}

/// Stream query with validated arguments.
#[derive(Debug, Clone)]
pub struct ResolveQuery {
    pub name: Option<String>,
    pub stream_type: Option<String>,
    /// Return once this many streams match. `None` collects for the whole
    /// timeout when there is no filter, and waits for one stream otherwise.
    pub minimum: Option<i32>,
    pub timeout: f64,
}

impl Default for ResolveQuery {
    fn default() -> Self {
        Self {
            name: None,
            stream_type: None,
            minimum: None,
            timeout: 1.0,
        }
    }
}

impl ResolveQuery {
    pub fn validate(&self) -> Result<(), ResolveError> {
        if !(self.timeout > 0.0) || !self.timeout.is_finite() {
            return Err(ResolveError::InvalidTimeout);
        }
        if self.minimum.is_some_and(|m| m <= 0) {
            return Err(ResolveError::InvalidMinimum);
        }
        Ok(())
    }

    /// LSL predicate combining the name and type filters.
    pub fn predicate(&self) -> Option<String> {
        let mut predicates = Vec::new();
        if let Some(ref name) = self.name {
            predicates.push(format!("name='{}'", name));
        }
        if let Some(ref stream_type) = self.stream_type {
            predicates.push(format!("type='{}'", stream_type));
        }
        (!predicates.is_empty()).then(|| predicates.join(" and "))
    }

    /// Which liblsl call answers this query.
    pub fn lookup(&self) -> Lookup {
        match (self.predicate(), self.minimum) {
            (None, None) => Lookup::All,
            // an empty predicate matches every stream of the session
            (predicate, minimum) => Lookup::ByPredicate {
                predicate: predicate.unwrap_or_default(),
                minimum: minimum.unwrap_or(1),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    All,
    ByPredicate { predicate: String, minimum: i32 },
}

/// Resolve streams on the network. Arguments are checked before any network call.
pub fn resolve_streams(query: &ResolveQuery) -> Result<Vec<lsl::StreamInfo>, ResolveError> {
    query.validate()?;
    let result = match query.lookup() {
        Lookup::All => lsl::resolve_streams(query.timeout),
        Lookup::ByPredicate { predicate, minimum } => {
            tracing::debug!("LSL predicate: '{}', minimum {}", predicate, minimum);
            lsl::resolve_bypred(&predicate, minimum, query.timeout)
        }
    };
    result.map_err(|e| ResolveError::Lsl(e.to_string()))
}

/// List amplifiers currently on the network.
pub fn search_amps(timeout: f64, ignore_markers: bool, eeg_only: bool) -> Result<Vec<AmpInfo>, ResolveError> {
    let query = ResolveQuery {
        timeout,
        ..Default::default()
    };
    let mut amps: Vec<AmpInfo> = resolve_streams(&query)?
        .iter_mut()
        .map(AmpInfo::from_stream_info)
        .filter(|a| !(ignore_markers && a.is_markers()))
        .filter(|a| !eeg_only || a.is_eeg())
        .collect();
    amps.sort_by(|a, b| a.name.cmp(&b.name).then(a.serial.cmp(&b.serial)));
    amps.dedup_by(|a, b| a.uid == b.uid);
    Ok(amps)
}

/// Stream resolution and retry configuration
#[derive(Debug, Clone)]
pub struct StreamResolutionConfig {
    pub timeout: f64,
    pub max_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub manual_pull_timeout: Option<f64>,
}

impl Default for StreamResolutionConfig {
    fn default() -> Self {
        Self {
            timeout: 5.0,
            max_retry_attempts: 3,
            retry_base_delay_ms: 100,
            manual_pull_timeout: None,
        }
    }
}

/// Which amplifier to record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmpTarget {
    pub name: Option<String>,
    pub serial: Option<String>,
    pub eeg_only: bool,
}

impl AmpTarget {
    pub fn describe(&self) -> String {
        format!(
            "name={} serial={}{}",
            self.name.as_deref().unwrap_or("*"),
            self.serial.as_deref().unwrap_or("*"),
            if self.eeg_only { " (EEG only)" } else { "" }
        )
    }
}

/// Resolve one amplifier, retrying with random delays so several processes
/// searching at once do not hammer the network in lockstep.
pub fn resolve_amp(
    target: &AmpTarget,
    config: &StreamResolutionConfig,
    quiet: bool,
) -> anyhow::Result<(lsl::StreamInfo, AmpInfo)> {
    let query = ResolveQuery {
        name: target.name.clone(),
        timeout: config.timeout,
        ..Default::default()
    };
    query.validate()?;
    let attempts = config.max_retry_attempts.max(1);

    if !quiet {
        println!("Resolving amplifier {}...", target.describe());
    }

    for attempt in 0..attempts {
        if attempt > 0 {
            let jitter = fastrand::u64(0..20);
            let delay = Duration::from_millis(config.retry_base_delay_ms + jitter);
            if !quiet {
                println!("Retrying amplifier resolution in {:?}...", delay);
            }
            thread::sleep(delay);
        }

        match resolve_streams(&query) {
            Ok(streams) => {
                for mut info in streams {
                    let amp = AmpInfo::from_stream_info(&mut info);
                    if amp.is_markers() || (target.eeg_only && !amp.is_eeg()) {
                        continue;
                    }
                    if amp.matches(target.name.as_deref(), target.serial.as_deref()) {
                        if !quiet && attempt > 0 {
                            println!("Resolved amplifier on attempt {}", attempt + 1);
                        }
                        return Ok((info, amp));
                    }
                }
                if !quiet {
                    println!("No matching amplifier on attempt {} (will retry)", attempt + 1);
                }
            }
            Err(e) if attempt + 1 < attempts => {
                if !quiet {
                    println!("LSL resolution error on attempt {} (will retry): {}", attempt + 1, e);
                }
            }
            Err(e) => {
                return Err(anyhow::anyhow!("LSL error after {} attempts: {}", attempts, e));
            }
        }
    }

    Err(ResolveError::NotFound(target.describe()).into())
}

#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Amplifier list changed.
    Found(Vec<AmpInfo>),
    Error(String),
    Stopped,
}

/// Background amplifier search, running while `lsl_state` is `Started`.
///
/// Each search that changes the list is reported; the thread ends (sending
/// [`ScanEvent::Stopped`]) as soon as the state leaves `Started`. A flag must
/// not be reused for a second scanner: setting it back to `Started` revives
/// a scanner that has not yet seen the stop.
pub fn spawn_scanner(
    lsl_state: SharedState,
    interval: Duration,
    eeg_only: bool,
    tx: Sender<ScanEvent>,
) -> JoinHandle<()> {
    spawn_scanner_with(lsl_state, interval, tx, move || search_amps(1.0, true, eeg_only))
}

/// [`spawn_scanner`] with the search itself supplied by the caller.
pub fn spawn_scanner_with<F>(lsl_state: SharedState, interval: Duration, tx: Sender<ScanEvent>, mut search: F) -> JoinHandle<()>
where
    F: FnMut() -> Result<Vec<AmpInfo>, ResolveError> + Send + 'static,
{
    thread::spawn(move || {
        let mut last: Option<Vec<AmpInfo>> = None;
        while lsl_state.is(RunState::Started) {
            match search() {
                Ok(amps) => {
                    if last.as_ref() != Some(&amps) {
                        tracing::info!("Found {} amplifier(s)", amps.len());
                        if tx.send(ScanEvent::Found(amps.clone())).is_err() {
                            return;
                        }
                        last = Some(amps);
                    }
                }
                Err(e) => {
                    if tx.send(ScanEvent::Error(e.to_string())).is_err() {
                        return;
                    }
                }
            }
            if lsl_state.wait_while(RunState::Started, interval) != RunState::Started {
                break;
            }
        }
        let _ = tx.send(ScanEvent::Stopped);
    })
}

/// One amplifier scan: its own run flag, thread and result channel.
pub struct Scanner {
    state: SharedState,
    handle: JoinHandle<()>,
    events: Receiver<ScanEvent>,
}

impl Scanner {
    pub fn start(interval: Duration, eeg_only: bool) -> Self {
        Self::spawn(|state, tx| spawn_scanner(state, interval, eeg_only, tx))
    }

    pub fn start_with<F>(interval: Duration, search: F) -> Self
    where
        F: FnMut() -> Result<Vec<AmpInfo>, ResolveError> + Send + 'static,
    {
        Self::spawn(|state, tx| spawn_scanner_with(state, interval, tx, search))
    }

    fn spawn(run: impl FnOnce(SharedState, Sender<ScanEvent>) -> JoinHandle<()>) -> Self {
        let state = SharedState::new(RunState::Started);
        let (tx, events) = mpsc::channel();
        let handle = run(state.clone(), tx);
        Self { state, handle, events }
    }

    pub fn is_running(&self) -> bool {
        self.state.is(RunState::Started)
    }

    /// Ask the thread to end. It finishes after the search in progress.
    pub fn stop(&self) {
        self.state.set(RunState::Stopped);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn events(&self) -> impl Iterator<Item = ScanEvent> + '_ {
        self.events.try_iter()
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn library_version() -> i32 {
    lsl::library_version()
}

pub fn protocol_version() -> i32 {
    lsl::protocol_version()
}

/// LSL clock in seconds.
pub fn local_clock() -> f64 {
    lsl::local_clock()
}
