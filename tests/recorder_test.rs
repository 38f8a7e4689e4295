use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use bci_launcher::error::RecorderError;
use bci_launcher::recorder::{RecorderOptions, StreamRecorder};
use bci_launcher::state::{RunState, SharedState};
use bci_launcher::zarr::{SessionAttrs, open_or_create_zarr_store, read_group_attributes};

#[test]
fn needs_a_record_dir() {
    assert!(matches!(
        StreamRecorder::new(RecorderOptions::default()),
        Err(RecorderError::NoRecordDir)
    ));
}

#[test]
fn record_requires_connect() {
    let tmp = TempDir::new().unwrap();
    let mut recorder = StreamRecorder::new(RecorderOptions {
        record_dir: Some(tmp.path().join("rec")),
        ..Default::default()
    })
    .unwrap();
    assert!(tmp.path().join("rec").is_dir());
    assert!(matches!(recorder.record(), Err(RecorderError::NotConnected)));
    assert!(!recorder.is_recording());
    assert!(matches!(recorder.stop(), Ok(None)));
}

/// Test amplifier: a counter on two float channels at 100 Hz.
fn spawn_test_amp(name: &'static str, running: Arc<AtomicBool>) -> thread::JoinHandle<Result<()>> {
    thread::spawn(move || {
        use lsl::Pushable;
        let info = lsl::StreamInfo::new(name, "EEG", 2, 100.0, lsl::ChannelFormat::Float32, "bci-launcher-test")?;
        let outlet = lsl::StreamOutlet::new(&info, 0, 360)?;
        let mut n = 0.0f32;
        while running.load(Ordering::SeqCst) {
            outlet.push_sample(&vec![n, -n])?;
            n += 1.0;
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    })
}

#[test]
#[ignore] // opens an LSL outlet on the local network
fn records_a_local_amplifier() -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let amp = spawn_test_amp("BciLauncherTestAmp", running.clone());
    thread::sleep(Duration::from_millis(500));

    let tmp = TempDir::new()?;
    let mut recorder = StreamRecorder::new(RecorderOptions {
        record_dir: Some(tmp.path().to_path_buf()),
        subject: Some("S01-mi".to_string()),
        quiet: true,
        ..Default::default()
    })?;
    let info = recorder.connect(Some("BciLauncherTestAmp"), None, true)?;
    assert_eq!(info.channels, 2);

    // the protocol flag opens once the amplifier is connected
    let protocol = SharedState::new(RunState::Waiting);
    let record = recorder.state();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_secs(1));
        record.set(RunState::Stopped);
    });
    let summary = recorder.run_supervised(&protocol)?.expect("recording summary");
    stopper.join().unwrap();
    assert_eq!(protocol.get(), RunState::Started);
    assert!(summary.samples > 0);

    let store = open_or_create_zarr_store(&summary.store_path, &SessionAttrs::default())?;
    let root = read_group_attributes(&store, "/")?;
    assert_eq!(root["subject"], "S01-mi");

    running.store(false, Ordering::SeqCst);
    amp.join().unwrap()?;
    Ok(())
}
