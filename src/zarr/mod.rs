//! Zarr v3 recording stores.
//!
//! One store per recording run, `<record_dir>/<YYYYMMDD-HHMMSS>-raw.zarr`:
//!
//! ```text
//! /                 attrs: subject, session_id, modality, created_at, hostname
//! /<stream>/        attrs: stream_info, recorder_config, lsl_clock_offset,
//!                          recorded_at, first_timestamp, last_timestamp, sample_count
//! /<stream>/data    [channels, samples], amplifier sample type
//! /<stream>/time    [samples], f64 LSL timestamps
//! ```

pub mod writer;

use anyhow::Result;
use chrono::{DateTime, Local};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use zarrs::array::codec::{BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::GroupBuilder;
use zarrs::storage::{ReadableStorageTraits, StoreKey};

pub use writer::{SampleData, SampleFormat, ZarrWriter};

/// Store path for a run started at `now`.
pub fn recording_store_path(record_dir: &Path, now: DateTime<Local>) -> PathBuf {
    record_dir.join(format!("{}-raw.zarr", now.format("%Y%m%d-%H%M%S")))
}

/// Session-level attributes written on the root group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionAttrs {
    pub subject: Option<String>,
    pub session_id: Option<String>,
    pub modality: Option<String>,
}

/// Amplifier stream description stored on the stream group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub stream_type: String,
    pub source_id: String,
    pub hostname: String,
    pub channel_count: usize,
    pub nominal_srate: f64,
    pub channel_format: SampleFormat,
    pub created_at: f64,
    pub uid: String,
    pub session_id: String,
    pub version: i32,
    pub serial: String,
    /// `<desc>` subtree as nested JSON.
    pub description: Value,
}

impl StreamMeta {
    pub fn from_stream_info(info: &mut lsl::StreamInfo, serial: &str) -> Result<Self> {
        let format = SampleFormat::try_from(info.channel_format())?;
        let xml = info
            .to_xml()
            .map_err(|e| anyhow::anyhow!("Failed to serialize stream info XML: {}", e))?;

        Ok(Self {
            name: info.stream_name().to_string(),
            stream_type: info.stream_type().to_string(),
            source_id: info.source_id().to_string(),
            hostname: info.hostname().to_string(),
            channel_count: info.channel_count() as usize,
            nominal_srate: info.nominal_srate(),
            channel_format: format,
            created_at: info.created_at(),
            uid: info.uid().to_string(),
            session_id: info.session_id().to_string(),
            version: info.version(),
            serial: serial.to_string(),
            description: parse_desc_to_json(&xml),
        })
    }

    /// Group name for this stream; `/` is not allowed in node names.
    pub fn group_name(&self) -> String {
        let cleaned: String = self
            .name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        if cleaned.trim().is_empty() {
            "amplifier".to_string()
        } else {
            cleaned
        }
    }
}

/// Open the store at `store_path`, creating the root group on first use.
///
/// Several recorders may point at the same store, so initialisation runs
/// under a file lock.
pub fn open_or_create_zarr_store(store_path: &Path, session: &SessionAttrs) -> Result<Arc<FilesystemStore>> {
    tracing::info!("Writing to Zarr store: {}", store_path.display());
    std::fs::create_dir_all(store_path)?;
    let store = Arc::new(FilesystemStore::new(store_path)?);

    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(store_path.join(".zarr_init.lock"))?;
    lock_file.lock_exclusive()?;

    let mut last_error = None;
    for attempt in 0..2 {
        match initialize_root(&store, session) {
            Ok(()) => {
                lock_file.unlock()?;
                return Ok(store);
            }
            Err(e) => {
                tracing::warn!("Failed to initialize Zarr store (attempt {}): {}", attempt + 1, e);
                last_error = Some(e);
                std::thread::sleep(Duration::from_millis(10 + fastrand::u64(0..20)));
            }
        }
    }

    lock_file.unlock()?;
    Err(anyhow::anyhow!(
        "Failed to initialize Zarr store after 2 attempts: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

fn initialize_root(store: &Arc<FilesystemStore>, session: &SessionAttrs) -> Result<()> {
    if node_exists(store, "/", "group")? {
        return Ok(());
    }
    let mut root = GroupBuilder::new().build(store.clone(), "/")?;
    let attrs = root.attributes_mut();
    attrs.insert("subject".to_string(), json!(session.subject));
    attrs.insert("session_id".to_string(), json!(session.session_id));
    attrs.insert("modality".to_string(), json!(session.modality));
    attrs.insert("created_at".to_string(), json!(chrono::Utc::now().to_rfc3339()));
    attrs.insert(
        "hostname".to_string(),
        json!(hostname::get().ok().map(|h| h.to_string_lossy().to_string())),
    );
    root.store_metadata()?;
    Ok(())
}

fn metadata_key(path: &str) -> Result<StoreKey> {
    let trimmed = path.trim_matches('/');
    let key = if trimmed.is_empty() {
        "zarr.json".to_string()
    } else {
        format!("{}/zarr.json", trimmed)
    };
    Ok(StoreKey::new(&key)?)
}

/// Zarr v3 keeps the node type in `zarr.json`.
fn node_exists(store: &Arc<FilesystemStore>, path: &str, node_type: &str) -> Result<bool> {
    match store.get(&metadata_key(path)?) {
        Ok(Some(bytes)) => {
            let json: Value = serde_json::from_slice(&bytes)?;
            Ok(json.get("node_type").and_then(Value::as_str) == Some(node_type))
        }
        _ => Ok(false),
    }
}

/// Turn the `<desc>` element of a stream-info document into nested JSON.
///
/// Elements with children become objects, leaves become strings, and
/// repeated siblings (`<channel>` entries) become arrays.
pub fn parse_desc_to_json(xml: &str) -> Value {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // (tag, children, text) for each open element below <desc>
    let mut stack: Vec<(String, Map<String, Value>, String)> = Vec::new();
    let mut in_desc = false;

    fn insert(map: &mut Map<String, Value>, key: String, value: Value) {
        match map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key, value);
            }
        }
    }

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if in_desc {
                    stack.push((tag, Map::new(), String::new()));
                } else if tag == "desc" {
                    in_desc = true;
                    stack.push((tag, Map::new(), String::new()));
                }
            }
            Ok(Event::Empty(e)) if in_desc => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if let Some((_, children, _)) = stack.last_mut() {
                    insert(children, tag, Value::String(String::new()));
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"desc" => return Value::Object(Map::new()),
            Ok(Event::Text(e)) if in_desc => {
                if let (Some((_, _, text)), Ok(t)) = (stack.last_mut(), e.unescape()) {
                    text.push_str(&t);
                }
            }
            Ok(Event::End(_)) if in_desc => {
                let Some((tag, children, text)) = stack.pop() else {
                    break;
                };
                let value = if children.is_empty() {
                    Value::String(text)
                } else {
                    Value::Object(children)
                };
                match stack.last_mut() {
                    Some((_, parent, _)) => insert(parent, tag, value),
                    None => {
                        return match value {
                            Value::Object(_) => value,
                            _ => Value::Object(Map::new()),
                        };
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!("Error parsing LSL XML: {}", e);
                break;
            }
            _ => {}
        }
    }

    Value::Object(Map::new())
}

fn blosc(shuffle: BloscShuffleMode, typesize: usize) -> Result<Arc<BloscCodec>> {
    let level = BloscCompressionLevel::try_from(5u8)
        .map_err(|e| anyhow::anyhow!("Invalid compression level: {}", e))?;
    Ok(Arc::new(BloscCodec::new(
        BloscCompressor::LZ4,
        level,
        None,
        shuffle,
        Some(typesize),
    )?))
}

/// Create (or reopen) `/<stream>/data` and `/<stream>/time`.
pub fn setup_stream_arrays(
    store: &Arc<FilesystemStore>,
    meta: &StreamMeta,
    recorder_config_json: &str,
    time_correction: f64,
) -> Result<(Array<FilesystemStore>, Array<FilesystemStore>)> {
    let stream_path = format!("/{}", meta.group_name());
    if !node_exists(store, &stream_path, "group")? {
        GroupBuilder::new().build(store.clone(), &stream_path)?.store_metadata()?;
    }

    let data_path = format!("{}/data", stream_path);
    let data_array = if node_exists(store, &data_path, "array")? {
        Array::open(store.clone(), &data_path)?
    } else {
        let channels = meta.channel_count as u64;
        let format = meta.channel_format;
        let array = ArrayBuilder::new(
            vec![channels, 0],
            vec![channels.max(1), 100],
            format.dtype(),
            format.fill_value(),
        )
        .dimension_names(Some(vec![Some("channels".to_string()), Some("samples".to_string())]))
        .bytes_to_bytes_codecs(vec![blosc(format.shuffle_mode(), format.typesize())?])
        .build(store.clone(), &data_path)?;
        array.store_metadata()?;

        let recorder_config: Value = serde_json::from_str(recorder_config_json)?;
        let mut group = zarrs::group::Group::open(store.clone(), &stream_path)?;
        let attrs = group.attributes_mut();
        attrs.insert("stream_info".to_string(), serde_json::to_value(meta)?);
        attrs.insert("recorder_config".to_string(), recorder_config);
        attrs.insert("lsl_clock_offset".to_string(), json!(time_correction));
        attrs.insert("recorded_at".to_string(), json!(chrono::Utc::now().to_rfc3339()));
        group.store_metadata()?;

        array
    };

    let time_path = format!("{}/time", stream_path);
    let time_array = if node_exists(store, &time_path, "array")? {
        Array::open(store.clone(), &time_path)?
    } else {
        let array = ArrayBuilder::new(vec![0], vec![100], DataType::Float64, FillValue::from(0.0f64))
            .dimension_names(Some(vec![Some("samples".to_string())]))
            .bytes_to_bytes_codecs(vec![blosc(BloscShuffleMode::BitShuffle, 8)?])
            .build(store.clone(), &time_path)?;
        array.store_metadata()?;
        array
    };

    Ok((data_array, time_array))
}

/// Attributes of the group at `path` (Zarr v3 `zarr.json`).
pub fn read_group_attributes(store: &Arc<FilesystemStore>, path: &str) -> Result<Value> {
    let key = metadata_key(path)?;
    let bytes = store
        .get(&key)?
        .ok_or_else(|| anyhow::anyhow!("Metadata not found at {}", key))?;
    let metadata: Value = serde_json::from_slice(&bytes)?;
    Ok(metadata.get("attributes").cloned().unwrap_or_else(|| json!({})))
}
