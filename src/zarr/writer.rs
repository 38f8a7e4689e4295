use anyhow::{Result, bail};
use fs2::FileExt;
use ndarray::{Array1, Array2, Ix1, Ix2};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use zarrs::array::codec::BloscShuffleMode;
use zarrs::array::{Array, ArrayError, DataType, FillValue};
use zarrs::filesystem::FilesystemStore;

/// Numeric sample formats an amplifier can stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    Float32,
    Float64,
    Int32,
    Int16,
    Int8,
}

impl TryFrom<lsl::ChannelFormat> for SampleFormat {
    type Error = anyhow::Error;

    fn try_from(format: lsl::ChannelFormat) -> Result<Self> {
        match format {
            lsl::ChannelFormat::Float32 => Ok(SampleFormat::Float32),
            lsl::ChannelFormat::Double64 => Ok(SampleFormat::Float64),
            lsl::ChannelFormat::Int32 => Ok(SampleFormat::Int32),
            lsl::ChannelFormat::Int16 => Ok(SampleFormat::Int16),
            lsl::ChannelFormat::Int8 => Ok(SampleFormat::Int8),
            other => Err(anyhow::anyhow!(
                "Unsupported channel format for an amplifier recording: {:?}",
                other
            )),
        }
    }
}

impl SampleFormat {
    pub fn dtype(self) -> DataType {
        match self {
            SampleFormat::Float32 => DataType::Float32,
            SampleFormat::Float64 => DataType::Float64,
            SampleFormat::Int32 => DataType::Int32,
            SampleFormat::Int16 => DataType::Int16,
            SampleFormat::Int8 => DataType::Int8,
        }
    }

    pub fn fill_value(self) -> FillValue {
        match self {
            SampleFormat::Float32 => FillValue::from(0.0f32),
            SampleFormat::Float64 => FillValue::from(0.0f64),
            SampleFormat::Int32 => FillValue::from(0i32),
            SampleFormat::Int16 => FillValue::from(0i16),
            SampleFormat::Int8 => FillValue::from(0i8),
        }
    }

    /// Element size in bytes (Blosc needs it to shuffle).
    pub fn typesize(self) -> usize {
        match self {
            SampleFormat::Float64 => 8,
            SampleFormat::Float32 | SampleFormat::Int32 => 4,
            SampleFormat::Int16 => 2,
            SampleFormat::Int8 => 1,
        }
    }

    /// Bit shuffling compresses float signals best, byte shuffling integers.
    pub fn shuffle_mode(self) -> BloscShuffleMode {
        match self {
            SampleFormat::Float32 | SampleFormat::Float64 => BloscShuffleMode::BitShuffle,
            _ => BloscShuffleMode::Shuffle,
        }
    }
}

/// One pulled sample, tagged by its format.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Int32(Vec<i32>),
    Int16(Vec<i16>),
    Int8(Vec<i8>),
}

macro_rules! sample_from_slice {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<&[$t]> for SampleData {
                fn from(values: &[$t]) -> Self {
                    SampleData::$variant(values.to_vec())
                }
            }
        )*
    };
}

sample_from_slice!(f32 => Float32, f64 => Float64, i32 => Int32, i16 => Int16, i8 => Int8);

impl SampleData {
    pub fn len(&self) -> usize {
        match self {
            SampleData::Float32(v) => v.len(),
            SampleData::Float64(v) => v.len(),
            SampleData::Int32(v) => v.len(),
            SampleData::Int16(v) => v.len(),
            SampleData::Int8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Buffered appender for one stream's `data` and `time` arrays.
pub struct ZarrWriter {
    data_array: Array<FilesystemStore>,
    time_array: Array<FilesystemStore>,
    store: Arc<FilesystemStore>,
    stream_path: String,
    sample_buffer: Vec<SampleData>,
    time_buffer: Vec<f64>,
    buffer_size: usize,
    /// Hard cap on buffered samples, whatever the flush interval says.
    max_buffer_size: usize,
    current_length: usize,
    format: SampleFormat,
    last_flush_time: Instant,
    flush_interval: Duration,
    slow_flush_warnings: u32,
    last_flush_duration: Duration,
    // Serialises metadata writes across processes sharing the store
    metadata_lock: File,
}

impl ZarrWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data_array: Array<FilesystemStore>,
        time_array: Array<FilesystemStore>,
        buffer_size: usize,
        format: SampleFormat,
        flush_interval: Duration,
        store_path: &Path,
        store: Arc<FilesystemStore>,
        stream_name: &str,
    ) -> Result<Self> {
        let max_buffer_size = (buffer_size * 10).max(1000);
        let current_length = data_array.shape().get(1).copied().unwrap_or(0) as usize;

        let lock_path = store_path.join(".zarr_metadata.lock");
        let metadata_lock = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        Ok(Self {
            data_array,
            time_array,
            store,
            stream_path: format!("/{}", stream_name),
            sample_buffer: Vec::new(),
            time_buffer: Vec::new(),
            buffer_size: buffer_size.max(1),
            max_buffer_size,
            current_length,
            format,
            last_flush_time: Instant::now(),
            flush_interval,
            slow_flush_warnings: 0,
            last_flush_duration: Duration::ZERO,
            metadata_lock,
        })
    }

    pub fn add_sample(&mut self, data: impl Into<SampleData>, timestamp: f64) {
        self.sample_buffer.push(data.into());
        self.time_buffer.push(timestamp);
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.sample_buffer.is_empty() {
            return Ok(());
        }

        let flush_start = Instant::now();
        let num_samples = self.sample_buffer.len();
        let num_channels = self.sample_buffer[0].len();
        let new_length = self.current_length + num_samples;

        let start = [0u64, self.current_length as u64];
        let times = Array1::from_vec(self.time_buffer.clone());

        // channel-major layout: row = channel, column = sample
        macro_rules! write_samples {
            ($type:ty, $variant:ident) => {{
                let mut flat: Vec<$type> = Vec::with_capacity(num_channels * num_samples);
                for channel in 0..num_channels {
                    for sample in &self.sample_buffer {
                        let SampleData::$variant(values) = sample else {
                            bail!("Sample format changed mid-recording (expected {:?})", self.format);
                        };
                        let Some(v) = values.get(channel) else {
                            bail!("Sample has {} channels, expected {}", values.len(), num_channels);
                        };
                        flat.push(*v);
                    }
                }
                let block = Array2::<$type>::from_shape_vec((num_channels, num_samples), flat)?;
                self.store_grown(num_channels, new_length, times, |data| {
                    data.store_array_subset_ndarray::<$type, Ix2>(&start, block)
                })?;
            }};
        }

        match self.format {
            SampleFormat::Float32 => write_samples!(f32, Float32),
            SampleFormat::Float64 => write_samples!(f64, Float64),
            SampleFormat::Int32 => write_samples!(i32, Int32),
            SampleFormat::Int16 => write_samples!(i16, Int16),
            SampleFormat::Int8 => write_samples!(i8, Int8),
        }

        self.current_length = new_length;
        self.sample_buffer.clear();
        self.time_buffer.clear();

        let flush_duration = flush_start.elapsed();
        self.last_flush_duration = flush_duration;
        self.last_flush_time = Instant::now();

        if flush_duration > Duration::from_millis(100) {
            self.slow_flush_warnings += 1;
            if self.slow_flush_warnings <= 5 {
                tracing::warn!(
                    "Slow Zarr flush: {}ms for {} samples (warning {}/5)",
                    flush_duration.as_millis(),
                    num_samples,
                    self.slow_flush_warnings
                );
            }
        }
        tracing::debug!(
            "Zarr: wrote {} samples (total {}, {}ms)",
            num_samples,
            self.current_length,
            flush_duration.as_millis()
        );

        // metadata goes last so readers never see a shape without data
        self.with_metadata_lock(|w| {
            w.data_array.store_metadata()?;
            w.time_array.store_metadata()?;
            Ok(())
        })
    }

    /// Grow both arrays to `new_length` samples and write the block at the
    /// old end. On failure the shapes go back to the written length and the
    /// buffers are kept.
    fn store_grown(
        &mut self,
        num_channels: usize,
        new_length: usize,
        times: Array1<f64>,
        write_data: impl FnOnce(&Array<FilesystemStore>) -> Result<(), ArrayError>,
    ) -> Result<()> {
        let written = self.current_length as u64;
        // zarrs does not grow arrays on write
        let result = (|| -> Result<()> {
            self.data_array.set_shape(vec![num_channels as u64, new_length as u64])?;
            self.time_array.set_shape(vec![new_length as u64])?;
            write_data(&self.data_array)?;
            self.time_array.store_array_subset_ndarray::<f64, Ix1>(&[written], times)?;
            Ok(())
        })();
        if result.is_err() {
            let channels = self.data_array.shape().first().copied().unwrap_or(num_channels as u64);
            self.data_array.set_shape(vec![channels, written])?;
            self.time_array.set_shape(vec![written])?;
        }
        result
    }

    /// In-memory shape of the `data` array, `[channels, samples]`.
    pub fn data_shape(&self) -> &[u64] {
        self.data_array.shape()
    }

    fn with_metadata_lock<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.metadata_lock.lock_exclusive()?;
        let result = f(self);
        self.metadata_lock.unlock()?;
        result
    }

    pub fn needs_flush(&self) -> bool {
        let buffered = self.sample_buffer.len();
        if buffered >= self.max_buffer_size || buffered >= self.buffer_size {
            return true;
        }
        if buffered > 0 && self.last_flush_time.elapsed() >= self.flush_interval {
            return true;
        }
        // writes are falling behind
        buffered > self.buffer_size / 2 && self.last_flush_duration > Duration::from_millis(50)
    }

    /// Record first/last timestamps and the sample count on the stream group.
    pub fn finalize_recording_metadata(&mut self, first_timestamp: Option<f64>, last_timestamp: Option<f64>) -> Result<()> {
        let sample_count = self.current_length;
        self.with_metadata_lock(|w| {
            let mut group = zarrs::group::Group::open(w.store.clone(), &w.stream_path)?;
            let attrs = group.attributes_mut();
            attrs.insert("first_timestamp".to_string(), json!(first_timestamp));
            attrs.insert("last_timestamp".to_string(), json!(last_timestamp));
            attrs.insert("sample_count".to_string(), json!(sample_count));
            attrs.insert("stopped_at".to_string(), json!(chrono::Utc::now().to_rfc3339()));
            group.store_metadata()?;
            Ok(())
        })
    }

    pub fn buffer_sample_count(&self) -> usize {
        self.sample_buffer.len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.max_buffer_size
    }

    /// Samples written to disk so far.
    pub fn written_samples(&self) -> usize {
        self.current_length
    }
}
