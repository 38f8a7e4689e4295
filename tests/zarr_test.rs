use std::time::Duration;

use anyhow::Result;
use chrono::{Local, TimeZone};
use serde_json::{Value, json};
use tempfile::TempDir;
use zarrs::array::Array;

use bci_launcher::zarr::{
    SampleFormat, SessionAttrs, StreamMeta, ZarrWriter, open_or_create_zarr_store, parse_desc_to_json,
    read_group_attributes, recording_store_path, setup_stream_arrays,
};

fn meta(name: &str, channels: usize) -> StreamMeta {
    StreamMeta {
        name: name.to_string(),
        stream_type: "EEG".to_string(),
        source_id: "sim-1".to_string(),
        hostname: "lab-pc".to_string(),
        channel_count: channels,
        nominal_srate: 250.0,
        channel_format: SampleFormat::Float32,
        created_at: 0.0,
        uid: "uid-1".to_string(),
        session_id: "default".to_string(),
        version: 110,
        serial: "SN-7".to_string(),
        description: json!({"channels": {"channel": [{"label": "C3"}, {"label": "C4"}]}}),
    }
}

#[test]
fn store_path_is_timestamped() {
    let now = Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
    let path = recording_store_path(std::path::Path::new("/data/S01-mi"), now);
    assert_eq!(path, std::path::Path::new("/data/S01-mi/20250102-030405-raw.zarr"));
}

#[test]
fn group_names_avoid_separators() {
    assert_eq!(meta("EEG/Amp", 1).group_name(), "EEG_Amp");
    assert_eq!(meta("  ", 1).group_name(), "amplifier");
}

#[test]
fn writes_channel_major_samples() -> Result<()> {
    let tmp = TempDir::new()?;
    let store_path = tmp.path().join("run-raw.zarr");
    let session = SessionAttrs {
        subject: Some("S01-mi".to_string()),
        session_id: Some("abc".to_string()),
        modality: Some("offline".to_string()),
    };
    let store = open_or_create_zarr_store(&store_path, &session)?;

    let root = read_group_attributes(&store, "/")?;
    assert_eq!(root["subject"], "S01-mi");
    assert_eq!(root["modality"], "offline");

    let meta = meta("LiveAmp", 2);
    let (data, time) = setup_stream_arrays(&store, &meta, r#"{"interactive": true}"#, 0.25)?;
    let mut writer = ZarrWriter::new(
        data,
        time,
        4,
        SampleFormat::Float32,
        Duration::from_secs(60),
        &store_path,
        store.clone(),
        &meta.group_name(),
    )?;

    for i in 0..5 {
        writer.add_sample(&[i as f32, -(i as f32)][..], 10.0 + i as f64 * 0.004);
        if writer.needs_flush() {
            writer.flush()?;
        }
    }
    assert_eq!(writer.written_samples(), 4);
    assert_eq!(writer.buffer_sample_count(), 1);
    writer.flush()?;
    writer.finalize_recording_metadata(Some(10.0), Some(10.016))?;
    assert_eq!(writer.written_samples(), 5);

    let data = Array::open(store.clone(), "/LiveAmp/data")?;
    assert_eq!(data.shape(), &[2, 5]);
    let time = Array::open(store.clone(), "/LiveAmp/time")?;
    assert_eq!(time.shape(), &[5]);

    let attrs = read_group_attributes(&store, "/LiveAmp")?;
    assert_eq!(attrs["sample_count"], 5);
    assert_eq!(attrs["first_timestamp"], 10.0);
    assert_eq!(attrs["lsl_clock_offset"], 0.25);
    assert_eq!(attrs["recorder_config"]["interactive"], true);
    assert_eq!(attrs["stream_info"]["serial"], "SN-7");
    Ok(())
}

#[test]
fn reopening_a_store_appends() -> Result<()> {
    let tmp = TempDir::new()?;
    let store_path = tmp.path().join("run-raw.zarr");
    let meta = meta("LiveAmp", 1);

    for _ in 0..2 {
        let store = open_or_create_zarr_store(&store_path, &SessionAttrs::default())?;
        let (data, time) = setup_stream_arrays(&store, &meta, "{}", 0.0)?;
        let mut writer = ZarrWriter::new(
            data,
            time,
            10,
            SampleFormat::Float32,
            Duration::from_secs(60),
            &store_path,
            store,
            &meta.group_name(),
        )?;
        writer.add_sample(&[1.0f32][..], 1.0);
        writer.flush()?;
    }

    let store = open_or_create_zarr_store(&store_path, &SessionAttrs::default())?;
    let data = Array::open(store, "/LiveAmp/data")?;
    assert_eq!(data.shape(), &[1, 2]);
    Ok(())
}

#[test]
fn mixed_sample_formats_are_rejected() -> Result<()> {
    let tmp = TempDir::new()?;
    let store_path = tmp.path().join("run-raw.zarr");
    let store = open_or_create_zarr_store(&store_path, &SessionAttrs::default())?;
    let meta = meta("LiveAmp", 1);
    let (data, time) = setup_stream_arrays(&store, &meta, "{}", 0.0)?;
    let mut writer = ZarrWriter::new(
        data,
        time,
        10,
        SampleFormat::Float32,
        Duration::from_secs(60),
        &store_path,
        store,
        &meta.group_name(),
    )?;
    writer.add_sample(&[1i32][..], 1.0);
    assert!(writer.flush().is_err());
    Ok(())
}

#[test]
fn failed_flush_keeps_shape_and_buffer() -> Result<()> {
    let tmp = TempDir::new()?;
    let store_path = tmp.path().join("run-raw.zarr");
    let store = open_or_create_zarr_store(&store_path, &SessionAttrs::default())?;
    let meta = meta("LiveAmp", 2);
    let (data, time) = setup_stream_arrays(&store, &meta, "{}", 0.0)?;
    let mut writer = ZarrWriter::new(
        data,
        time,
        10,
        SampleFormat::Float32,
        Duration::from_secs(60),
        &store_path,
        store.clone(),
        &meta.group_name(),
    )?;

    writer.add_sample(&[1.0f32, 2.0][..], 1.0);
    writer.flush()?;
    assert_eq!(writer.data_shape(), &[2, 1]);

    // a short sample fails the flush before anything grows
    writer.add_sample(&[3.0f32, 4.0][..], 1.01);
    writer.add_sample(&[5.0f32][..], 1.02);
    assert!(writer.flush().is_err());
    assert_eq!(writer.data_shape(), &[2, 1]);
    assert_eq!(writer.written_samples(), 1);
    assert_eq!(writer.buffer_sample_count(), 2);

    let on_disk = Array::open(store.clone(), &format!("/{}/time", meta.group_name()))?;
    assert_eq!(on_disk.shape(), &[1]);
    Ok(())
}

#[test]
fn desc_becomes_nested_json() {
    let xml = r#"<info><name>A</name><desc>
        <acquisition><serial_number>SN-7</serial_number></acquisition>
        <channels>
          <channel><label>C3</label><unit>uV</unit></channel>
          <channel><label>C4</label><unit>uV</unit></channel>
        </channels>
        <reference/>
      </desc></info>"#;
    let desc = parse_desc_to_json(xml);
    assert_eq!(desc["acquisition"]["serial_number"], "SN-7");
    assert_eq!(desc["channels"]["channel"][1]["label"], "C4");
    assert_eq!(desc["reference"], "");

    assert_eq!(parse_desc_to_json("<info><desc/></info>"), json!({}));
    assert_eq!(parse_desc_to_json("<info/>"), Value::Object(Default::default()));
}
