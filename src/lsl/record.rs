//! Amplifier recording loop: LSL inlet to Zarr, driven by a run flag.

use anyhow::Result;
use lsl::Pullable;
use std::path::PathBuf;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use super::{AmpInfo, AmpTarget, StreamResolutionConfig, resolve_amp};
use crate::state::{Latch, RunState, SharedState};
use crate::status::StatusLine;
use crate::zarr::{
    SampleFormat, SessionAttrs, StreamMeta, ZarrWriter, open_or_create_zarr_store, setup_stream_arrays,
};

/// Flags shared between the recording loop and whoever controls it.
#[derive(Clone, Debug)]
pub struct RecordingSignals {
    /// `Started` pulls, `Waiting` pauses, `Stopped` finishes.
    pub state: SharedState,
    pub connected: Latch,
    pub first_sample: Latch,
    /// Set once connected when the amplifier has no nominal rate.
    pub irregular: Arc<AtomicBool>,
}

impl RecordingSignals {
    pub fn new(initial: RunState) -> Self {
        Self {
            state: SharedState::new(initial),
            connected: Latch::new(),
            first_sample: Latch::new(),
            irregular: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Buffering and flushing behaviour.
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    pub flush_interval: Duration,
    pub flush_buffer_size: usize,
    pub immediate_flush: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
            flush_buffer_size: 50,
            immediate_flush: false,
        }
    }
}

/// Where the recording goes.
#[derive(Debug, Clone)]
pub struct ZarrConfig {
    pub store_path: PathBuf,
    pub session: SessionAttrs,
}

pub struct RecordingParams {
    pub target: AmpTarget,
    pub signals: RecordingSignals,
    pub quiet: bool,
    pub zarr_config: ZarrConfig,
    pub recording_config: RecordingConfig,
    pub resolution_config: StreamResolutionConfig,
    /// Serialised into the stream group's `recorder_config` attribute.
    pub recorder_config_json: String,
    pub memory_monitor: bool,
}

/// What a finished recording produced.
#[derive(Debug, Clone)]
pub struct RecordingSummary {
    pub amp: AmpInfo,
    pub store_path: PathBuf,
    pub samples: u64,
    pub first_timestamp: Option<f64>,
    pub last_timestamp: Option<f64>,
}

enum SampleBuffer {
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Int32(Vec<i32>),
    Int16(Vec<i16>),
    Int8(Vec<i8>),
}

impl SampleBuffer {
    fn new(format: SampleFormat, channels: usize) -> Self {
        match format {
            SampleFormat::Float32 => SampleBuffer::Float32(Vec::with_capacity(channels)),
            SampleFormat::Float64 => SampleBuffer::Float64(Vec::with_capacity(channels)),
            SampleFormat::Int32 => SampleBuffer::Int32(Vec::with_capacity(channels)),
            SampleFormat::Int16 => SampleBuffer::Int16(Vec::with_capacity(channels)),
            SampleFormat::Int8 => SampleBuffer::Int8(Vec::with_capacity(channels)),
        }
    }
}

/// Pull timeout: 2.5 sample periods, between 5 ms and 100 ms.
/// Irregular streams (rate 0) use 100 ms.
pub fn calculate_pull_timeout(nominal_srate: f64, manual_override: Option<f64>) -> f64 {
    if let Some(manual) = manual_override {
        return manual;
    }
    if nominal_srate > 0.0 {
        (2.5 / nominal_srate).clamp(0.005, 0.1)
    } else {
        0.1
    }
}

/// About one second of samples, between 10 and 2000.
pub fn adaptive_buffer_size(nominal_srate: f64, config: &RecordingConfig) -> usize {
    if config.immediate_flush {
        1
    } else if nominal_srate > 0.0 {
        (nominal_srate as usize).clamp(10, 2000)
    } else {
        config.flush_buffer_size
    }
}

/// Resolve the target amplifier and record it until the flag is `Stopped`.
///
/// Writes `STATUS CONNECTED`, `STATUS WAITING` (when armed but paused) and
/// `STATUS FIRST_SAMPLE` on stdout for the supervising process.
pub fn record_lsl_stream(params: RecordingParams) -> Result<RecordingSummary> {
    let signals = &params.signals;
    let (resolved, amp) = resolve_amp(&params.target, &params.resolution_config, params.quiet)?;

    let inl = lsl::StreamInlet::new(&resolved, 300, 0, true).map_err(|e| anyhow::anyhow!("LSL error: {}", e))?;
    let mut info = inl
        .info(lsl::FOREVER)
        .map_err(|e| anyhow::anyhow!("LSL error: {}", e))?;
    let meta = StreamMeta::from_stream_info(&mut info, &amp.serial)?;

    let irregular = meta.nominal_srate == 0.0;
    signals.irregular.store(irregular, Ordering::SeqCst);

    inl.set_postprocessing(&[
        lsl::ProcessingOption::ClockSync,
        lsl::ProcessingOption::Dejitter,
        lsl::ProcessingOption::Monotonize,
    ])
    .map_err(|e| anyhow::anyhow!("LSL error: {}", e))?;

    let pull_timeout = calculate_pull_timeout(meta.nominal_srate, params.resolution_config.manual_pull_timeout);
    tracing::info!(
        "Connected to {} ({} channels, {} Hz, {:?}), pull timeout {:.3}s",
        amp.label(),
        meta.channel_count,
        meta.nominal_srate,
        meta.channel_format,
        pull_timeout
    );

    let mut writer = initialize_zarr_writer(&params, &inl, &meta)?;

    StatusLine::Connected {
        name: amp.name.clone(),
        serial: amp.serial.clone(),
    }
    .emit();
    signals.connected.release();
    if signals.state.is(RunState::Waiting) {
        StatusLine::Waiting.emit();
    }

    let mut sample_buffer = SampleBuffer::new(meta.channel_format, meta.channel_count);
    let mut sample_count: u64 = 0;
    let mut memory_monitor = MemoryMonitor::new(params.memory_monitor);
    let mut first_timestamp: Option<f64> = None;
    let mut last_timestamp: Option<f64> = None;

    loop {
        match signals.state.get() {
            RunState::Stopped => break,
            RunState::Waiting => {
                // paused: keep what is buffered safe on disk
                if writer.needs_flush() {
                    writer.flush()?;
                }
                signals.state.wait_while(RunState::Waiting, Duration::from_millis(200));
                continue;
            }
            RunState::Started => {}
        }

        macro_rules! pull_and_record {
            ($buf:expr) => {{
                $buf.clear();
                let ts = inl
                    .pull_sample_buf($buf, pull_timeout)
                    .map_err(|e| anyhow::anyhow!("LSL error: {}", e))?;
                if ts != 0.0 {
                    writer.add_sample($buf.as_slice(), ts);
                }
                ts
            }};
        }

        let ts = match &mut sample_buffer {
            SampleBuffer::Float32(buf) => pull_and_record!(buf),
            SampleBuffer::Float64(buf) => pull_and_record!(buf),
            SampleBuffer::Int32(buf) => pull_and_record!(buf),
            SampleBuffer::Int16(buf) => pull_and_record!(buf),
            SampleBuffer::Int8(buf) => pull_and_record!(buf),
        };

        if ts == 0.0 {
            continue;
        }

        sample_count += 1;
        last_timestamp = Some(ts);
        if sample_count == 1 {
            first_timestamp = Some(ts);
            signals.first_sample.release();
            StatusLine::FirstSample { regular: !irregular }.emit();
        }

        if writer.needs_flush() {
            writer.flush()?;
        }
        memory_monitor.maybe_report(sample_count, &writer, params.quiet);
    }

    writer.flush()?;
    writer.finalize_recording_metadata(first_timestamp, last_timestamp)?;

    tracing::info!("Recording stopped. Total samples: {}", sample_count);
    Ok(RecordingSummary {
        amp,
        store_path: params.zarr_config.store_path.clone(),
        samples: sample_count,
        first_timestamp,
        last_timestamp,
    })
}

fn initialize_zarr_writer(params: &RecordingParams, inl: &lsl::StreamInlet, meta: &StreamMeta) -> Result<ZarrWriter> {
    let config = &params.zarr_config;
    let store = open_or_create_zarr_store(&config.store_path, &config.session)?;

    let time_correction = inl
        .time_correction(lsl::FOREVER)
        .map_err(|e| anyhow::anyhow!("LSL error getting time correction: {}", e))?;

    let (data_array, time_array) = setup_stream_arrays(&store, meta, &params.recorder_config_json, time_correction)?;

    let buffer_size = adaptive_buffer_size(meta.nominal_srate, &params.recording_config);
    tracing::debug!(
        "Using buffer size {} for {:.1}Hz stream",
        buffer_size,
        meta.nominal_srate
    );

    ZarrWriter::new(
        data_array,
        time_array,
        buffer_size,
        meta.channel_format,
        params.recording_config.flush_interval,
        &config.store_path,
        store,
        &meta.group_name(),
    )
}

/// Periodic progress report during long recordings.
struct MemoryMonitor {
    last_report: Option<Instant>,
}

impl MemoryMonitor {
    fn new(enabled: bool) -> Self {
        Self {
            last_report: enabled.then(Instant::now),
        }
    }

    fn maybe_report(&mut self, sample_count: u64, writer: &ZarrWriter, quiet: bool) {
        if let Some(ref mut last_report) = self.last_report {
            if last_report.elapsed() >= Duration::from_secs(10) {
                let buffered = writer.buffer_sample_count();
                tracing::info!(
                    "Memory status: {} samples recorded, {} written, {} buffered ({:.1}% of capacity)",
                    sample_count,
                    writer.written_samples(),
                    buffered,
                    buffered as f64 / writer.buffer_capacity() as f64 * 100.0
                );
                *last_report = Instant::now();
            }
        } else if !quiet && sample_count % 10_000 == 0 {
            tracing::debug!("Recorded {} samples", sample_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_timeout_follows_rate() {
        assert!((calculate_pull_timeout(500.0, None) - 0.005).abs() < 1e-9);
        assert!((calculate_pull_timeout(100.0, None) - 0.025).abs() < 1e-9);
        assert_eq!(calculate_pull_timeout(1.0, None), 0.1);
        assert_eq!(calculate_pull_timeout(0.0, None), 0.1);
        assert_eq!(calculate_pull_timeout(2048.0, Some(0.02)), 0.02);
    }

    #[test]
    fn buffer_size_targets_one_second() {
        let config = RecordingConfig::default();
        assert_eq!(adaptive_buffer_size(250.0, &config), 250);
        assert_eq!(adaptive_buffer_size(4.0, &config), 10);
        assert_eq!(adaptive_buffer_size(10_000.0, &config), 2000);
        assert_eq!(adaptive_buffer_size(0.0, &config), config.flush_buffer_size);

        let immediate = RecordingConfig {
            immediate_flush: true,
            ..Default::default()
        };
        assert_eq!(adaptive_buffer_size(250.0, &immediate), 1);
    }
}
