use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Modality;
use crate::lsl::record::RecordingConfig;
use crate::lsl::{AmpTarget, StreamResolutionConfig};

#[derive(Parser, Clone, Debug)]
#[command(name = "bci-recorder")]
#[command(about = "Record an EEG amplifier stream to Zarr, controlled over stdin")]
pub struct RecorderArgs {
    #[arg(long, help = "Folder receiving the <timestamp>-raw.zarr store")]
    pub record_dir: Option<PathBuf>,

    #[arg(long, help = "Amplifier stream name (any when omitted)")]
    pub amp_name: Option<String>,

    #[arg(long, help = "Amplifier serial number (any when omitted or N/A)")]
    pub amp_serial: Option<String>,

    #[arg(long, help = "Only accept streams of type EEG")]
    pub eeg_only: bool,

    #[arg(long, short = 'i', help = "Interactive mode - accept START/STOP/STOP_AFTER/QUIT on stdin")]
    pub interactive: bool,

    #[arg(long, short = 'q', help = "Minimal output mode")]
    pub quiet: bool,

    #[arg(long, help = "Subject identifier for metadata")]
    pub subject: Option<String>,

    #[arg(long, help = "Session identifier for metadata (random UUID when omitted)")]
    pub session_id: Option<String>,

    #[arg(long, value_parser = parse_modality, help = "Modality tag: offline, trainer or online")]
    pub modality: Option<Modality>,

    #[arg(long, default_value = "5.0", help = "Timeout for stream resolution in seconds")]
    pub resolve_timeout: f64,

    #[arg(long, default_value = "1.0", help = "Flush data to disk interval in seconds")]
    pub flush_interval: f64,

    #[arg(
        long,
        default_value = "50",
        help = "Buffer size before forcing flush, for streams without nominal rate"
    )]
    pub flush_buffer_size: usize,

    #[arg(long, help = "Flush after every sample (maximum safety, lower performance)")]
    pub immediate_flush: bool,

    #[arg(long, default_value = "3", help = "Maximum number of attempts to resolve the amplifier")]
    pub lsl_max_retry_attempts: u32,

    #[arg(
        long,
        default_value = "100",
        help = "Base delay in milliseconds between LSL retry attempts"
    )]
    pub lsl_retry_base_delay_ms: u64,

    #[arg(
        long,
        help = "LSL pull timeout in seconds (auto-calculated from the sample rate if not set)"
    )]
    pub lsl_pull_timeout: Option<f64>,

    #[arg(long, help = "Enable periodic buffer usage reporting")]
    pub memory_monitor: bool,
}

fn parse_modality(s: &str) -> Result<Modality, String> {
    Modality::from_tag(s).ok_or_else(|| format!("unknown modality '{}' (offline, trainer, online)", s))
}

impl RecorderArgs {
    pub fn target(&self) -> AmpTarget {
        AmpTarget {
            name: self.amp_name.clone(),
            serial: self.amp_serial.clone(),
            eeg_only: self.eeg_only,
        }
    }

    pub fn recording_config(&self) -> RecordingConfig {
        RecordingConfig {
            flush_interval: Duration::from_secs_f64(self.flush_interval.max(0.0)),
            flush_buffer_size: self.flush_buffer_size,
            immediate_flush: self.immediate_flush,
        }
    }

    pub fn resolution_config(&self) -> StreamResolutionConfig {
        StreamResolutionConfig {
            timeout: self.resolve_timeout,
            max_retry_attempts: self.lsl_max_retry_attempts,
            retry_base_delay_ms: self.lsl_retry_base_delay_ms,
            manual_pull_timeout: self.lsl_pull_timeout,
        }
    }

    /// Recorder settings as stored in the Zarr stream attributes.
    pub fn to_recorder_config_json(&self, recording_start_time: Option<String>) -> anyhow::Result<String> {
        let config_json = json!({
            "record_dir": self.record_dir.as_ref().map(|p| p.display().to_string()),
            "amp_name": self.amp_name,
            "amp_serial": self.amp_serial,
            "eeg_only": self.eeg_only,
            "interactive": self.interactive,
            "subject": self.subject,
            "session_id": self.session_id,
            "modality": self.modality.map(|m| m.tag()),
            "resolve_timeout": self.resolve_timeout,
            "flush_interval": self.flush_interval,
            "flush_buffer_size": self.flush_buffer_size,
            "immediate_flush": self.immediate_flush,
            "lsl_max_retry_attempts": self.lsl_max_retry_attempts,
            "lsl_retry_base_delay_ms": self.lsl_retry_base_delay_ms,
            "lsl_pull_timeout": self.lsl_pull_timeout,
            "recorded_at": recording_start_time,
            "recorder_version": env!("CARGO_PKG_VERSION")
        });

        Ok(serde_json::to_string_pretty(&config_json)?)
    }

    /// Command-line arguments reproducing these settings, for spawning a recorder.
    pub fn to_command_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref dir) = self.record_dir {
            args.extend(["--record-dir".to_string(), dir.display().to_string()]);
        }
        if let Some(ref name) = self.amp_name {
            args.extend(["--amp-name".to_string(), name.clone()]);
        }
        if let Some(ref serial) = self.amp_serial {
            args.extend(["--amp-serial".to_string(), serial.clone()]);
        }
        if self.eeg_only {
            args.push("--eeg-only".to_string());
        }
        if self.interactive {
            args.push("--interactive".to_string());
        }
        if self.quiet {
            args.push("--quiet".to_string());
        }
        if let Some(ref subject) = self.subject {
            args.extend(["--subject".to_string(), subject.clone()]);
        }
        if let Some(ref session_id) = self.session_id {
            args.extend(["--session-id".to_string(), session_id.clone()]);
        }
        if let Some(modality) = self.modality {
            args.extend(["--modality".to_string(), modality.tag().to_string()]);
        }
        args
    }
}

impl Default for RecorderArgs {
    fn default() -> Self {
        Self {
            record_dir: None,
            amp_name: None,
            amp_serial: None,
            eeg_only: false,
            interactive: false,
            quiet: false,
            subject: None,
            session_id: None,
            modality: None,
            resolve_timeout: 5.0,
            flush_interval: 1.0,
            flush_buffer_size: 50,
            immediate_flush: false,
            lsl_max_retry_attempts: 3,
            lsl_retry_base_delay_ms: 100,
            lsl_pull_timeout: None,
            memory_monitor: false,
        }
    }
}
