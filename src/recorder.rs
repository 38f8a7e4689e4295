//! In-process recorder: connect to an amplifier, record it on a thread,
//! stop it with a bounded wait.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;

use crate::config::Modality;
use crate::error::RecorderError;
use crate::lsl::record::{RecordingConfig, RecordingParams, RecordingSignals, RecordingSummary, ZarrConfig, record_lsl_stream};
use crate::lsl::{AmpInfo, AmpTarget, StreamResolutionConfig, resolve_amp};
use crate::state::{Latch, RunState, SharedState};
use crate::zarr::{SessionAttrs, recording_store_path};

/// How long `stop` waits for the recording thread.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct RecorderOptions {
    pub record_dir: Option<PathBuf>,
    pub subject: Option<String>,
    pub session_id: Option<String>,
    pub modality: Option<Modality>,
    pub recording: RecordingConfig,
    pub resolution: StreamResolutionConfig,
    pub quiet: bool,
    pub memory_monitor: bool,
    /// Stored verbatim in the Zarr attributes; a minimal one is built when absent.
    pub recorder_config_json: Option<String>,
}

type RecordingThread = JoinHandle<anyhow::Result<RecordingSummary>>;

pub struct StreamRecorder {
    options: RecorderOptions,
    record_dir: PathBuf,
    target: Option<AmpTarget>,
    amp: Option<AmpInfo>,
    signals: RecordingSignals,
    finished: Latch,
    handle: Option<RecordingThread>,
}

impl StreamRecorder {
    pub fn new(options: RecorderOptions) -> Result<Self, RecorderError> {
        let record_dir = options.record_dir.clone().ok_or(RecorderError::NoRecordDir)?;
        std::fs::create_dir_all(&record_dir)
            .map_err(|e| RecorderError::Failed(format!("cannot create {}: {}", record_dir.display(), e)))?;

        Ok(Self {
            options,
            record_dir,
            target: None,
            amp: None,
            signals: RecordingSignals::new(RunState::Stopped),
            finished: Latch::new(),
            handle: None,
        })
    }

    /// Record under a flag owned by the caller, so it can stop the recording
    /// while `run_supervised` blocks.
    pub fn with_state(mut self, state: SharedState) -> Self {
        self.signals.state = state;
        self
    }

    /// Resolve the amplifier once so configuration errors surface before recording.
    pub fn connect(&mut self, amp_name: Option<&str>, amp_serial: Option<&str>, eeg_only: bool) -> anyhow::Result<AmpInfo> {
        let target = AmpTarget {
            name: amp_name.map(str::to_string),
            serial: amp_serial.map(str::to_string),
            eeg_only,
        };
        let (_, amp) = resolve_amp(&target, &self.options.resolution, self.options.quiet)?;
        tracing::info!("Recorder connected to {}", amp.label());
        self.target = Some(target);
        self.amp = Some(amp.clone());
        Ok(amp)
    }

    pub fn amp(&self) -> Option<&AmpInfo> {
        self.amp.as_ref()
    }

    pub fn signals(&self) -> &RecordingSignals {
        &self.signals
    }

    pub fn state(&self) -> SharedState {
        self.signals.state.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.handle.is_some() && !self.finished.is_released()
    }

    /// Start the recording thread with the flag set to `Started`.
    pub fn record(&mut self) -> Result<(), RecorderError> {
        let target = self.target.clone().ok_or(RecorderError::NotConnected)?;
        if self.is_recording() {
            return Err(RecorderError::AlreadyRecording);
        }

        let session = SessionAttrs {
            subject: self.options.subject.clone(),
            session_id: Some(
                self.options
                    .session_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            ),
            modality: self.options.modality.map(|m| m.tag().to_string()),
        };
        let recorder_config_json = match self.options.recorder_config_json.clone() {
            Some(json) => json,
            None => serde_json::json!({
                "amp_name": target.name,
                "amp_serial": target.serial,
                "eeg_only": target.eeg_only,
                "recorded_at": chrono::Utc::now().to_rfc3339(),
                "recorder_version": env!("CARGO_PKG_VERSION"),
            })
            .to_string(),
        };

        let params = RecordingParams {
            target,
            signals: self.arm(),
            quiet: self.options.quiet,
            zarr_config: ZarrConfig {
                store_path: recording_store_path(&self.record_dir, Local::now()),
                session,
            },
            recording_config: self.options.recording.clone(),
            resolution_config: self.options.resolution.clone(),
            recorder_config_json,
            memory_monitor: self.options.memory_monitor,
        };

        self.spawn_recording(move || record_lsl_stream(params))
    }

    /// Fresh latches for the next recording, with the record flag set to
    /// `Started`. Handles taken from [`state`](Self::state) stay valid.
    fn arm(&mut self) -> RecordingSignals {
        self.signals = RecordingSignals {
            state: self.signals.state.clone(),
            ..RecordingSignals::new(RunState::Started)
        };
        self.finished = Latch::new();
        self.signals.state.set(RunState::Started);
        self.signals.clone()
    }

    fn spawn_recording<F>(&mut self, work: F) -> Result<(), RecorderError>
    where
        F: FnOnce() -> anyhow::Result<RecordingSummary> + Send + 'static,
    {
        let state = self.signals.state.clone();
        let finished = self.finished.clone();
        let handle = thread::Builder::new()
            .name("recorder".to_string())
            .spawn(move || {
                let result = work();
                if let Err(ref e) = result {
                    tracing::error!("Recording failed: {:#}", e);
                }
                // a dead recorder must not leave anyone waiting on a live flag
                state.set(RunState::Stopped);
                finished.release();
                result
            })
            .map_err(|e| {
                self.signals.state.set(RunState::Stopped);
                RecorderError::Failed(e.to_string())
            })?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Finish the recording and wait up to [`STOP_TIMEOUT`] for it.
    ///
    /// Returns `Ok(None)` when nothing was recording.
    pub fn stop(&mut self) -> Result<Option<RecordingSummary>, RecorderError> {
        self.signals.state.set(RunState::Stopped);
        let Some(handle) = self.handle.take() else {
            return Ok(None);
        };

        if !self.finished.wait(STOP_TIMEOUT) {
            tracing::error!("Recorder did not stop within {:?}", STOP_TIMEOUT);
            // detached: the thread ends on its own once LSL returns
            return Err(RecorderError::Unresponsive(STOP_TIMEOUT));
        }

        match handle.join() {
            Ok(Ok(summary)) => Ok(Some(summary)),
            Ok(Err(e)) => Err(RecorderError::Failed(format!("{:#}", e))),
            Err(_) => Err(RecorderError::Failed("recording thread panicked".to_string())),
        }
    }

    /// Record, release `protocol_state` once the amplifier is live, and keep
    /// recording until the record flag is stopped.
    pub fn run_supervised(&mut self, protocol_state: &SharedState) -> Result<Option<RecordingSummary>, RecorderError> {
        self.record()?;
        self.supervise(protocol_state)
    }

    fn supervise(&mut self, protocol_state: &SharedState) -> Result<Option<RecordingSummary>, RecorderError> {
        loop {
            if self.signals.connected.wait(Duration::from_millis(200)) {
                protocol_state.set(RunState::Started);
                break;
            }
            if self.finished.is_released() || self.signals.state.is(RunState::Stopped) {
                break;
            }
        }

        self.signals.state.wait_until(RunState::Stopped);
        self.stop()
    }
}

impl Drop for StreamRecorder {
    fn drop(&mut self) {
        self.signals.state.set(RunState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(store_path: PathBuf) -> RecordingSummary {
        RecordingSummary {
            amp: AmpInfo {
                name: "StubAmp".to_string(),
                stream_type: "EEG".to_string(),
                serial: "N/A".to_string(),
                channels: 2,
                srate: 100.0,
                channel_format: "Float32".to_string(),
                source_id: String::new(),
                hostname: String::new(),
                uid: String::new(),
            },
            store_path,
            samples: 3,
            first_timestamp: Some(1.0),
            last_timestamp: Some(1.02),
        }
    }

    /// Stand-in for the LSL loop: connects at once and records until stopped.
    fn stub_loop(recorder: &mut StreamRecorder) {
        let signals = recorder.arm();
        let store_path = recorder.record_dir.join("stub.zarr");
        recorder
            .spawn_recording(move || {
                signals.connected.release();
                signals.state.wait_until(RunState::Stopped);
                Ok(summary(store_path))
            })
            .unwrap();
    }

    fn recorder(dir: &tempfile::TempDir) -> StreamRecorder {
        StreamRecorder::new(RecorderOptions {
            record_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn handle_taken_before_recording_stops_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder(&dir);
        let record = recorder.state();
        let protocol = SharedState::new(RunState::Waiting);

        stub_loop(&mut recorder);
        assert!(record.is(RunState::Started));
        assert!(recorder.is_recording());

        let stopper = {
            let record = record.clone();
            let protocol = protocol.clone();
            thread::spawn(move || {
                assert!(protocol.wait_for(RunState::Started, Duration::from_secs(5)));
                record.set(RunState::Stopped);
            })
        };
        let result = recorder.supervise(&protocol).unwrap().unwrap();
        stopper.join().unwrap();

        assert_eq!(result.samples, 3);
        assert_eq!(protocol.get(), RunState::Started);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn caller_owned_flag_drives_the_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let record = SharedState::new(RunState::Stopped);
        let mut recorder = recorder(&dir).with_state(record.clone());

        stub_loop(&mut recorder);
        assert!(record.is(RunState::Started));

        record.set(RunState::Stopped);
        let result = recorder.supervise(&SharedState::new(RunState::Waiting)).unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn stop_before_connection_ends_supervision() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder(&dir);
        let record = recorder.state();

        // a loop that never connects but honours the flag
        let signals = recorder.arm();
        recorder
            .spawn_recording(move || {
                signals.state.wait_until(RunState::Stopped);
                anyhow::bail!("no amplifier")
            })
            .unwrap();

        let protocol = SharedState::new(RunState::Waiting);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            record.set(RunState::Stopped);
        });
        let result = recorder.supervise(&protocol);
        stopper.join().unwrap();

        assert!(matches!(result, Err(RecorderError::Failed(_))));
        assert_eq!(protocol.get(), RunState::Waiting);
    }
}
