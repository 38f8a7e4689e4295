use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use serde_json::{Value, json};
use tempfile::TempDir;

use bci_launcher::config::experiment::RunSnapshot;
use bci_launcher::config::subject::{create_subject, find_subject_config, prepare_config_files, protocol_of, read_channels};
use bci_launcher::config::{ExperimentConfig, Modality, RecordPolicy, Settings};
use bci_launcher::error::ConfigError;
use bci_launcher::protocol::ProtocolParams;

/// Shipped `config_files/` with throwaway data and scripts folders.
fn settings(tmp: &TempDir) -> Settings {
    Settings::new(
        env!("CARGO_MANIFEST_DIR"),
        tmp.path().join("data"),
        tmp.path().join("scripts"),
    )
}

fn load(settings: &Settings, subject_dir: &Path, modality: Modality) -> ExperimentConfig {
    let (subject, structure) = prepare_config_files(settings, subject_dir, modality).unwrap();
    ExperimentConfig::load(&structure, &subject).unwrap()
}

#[test]
fn shipped_protocol_is_listed() {
    let tmp = TempDir::new().unwrap();
    assert!(settings(&tmp).protocols().contains(&"mi".to_string()));
}

#[test]
fn new_subject_gets_every_modality() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(&tmp);
    let subject_dir = create_subject(&settings, "S01", "mi").unwrap();

    assert_eq!(subject_dir, tmp.path().join("scripts/S01-mi"));
    assert!(settings.record_dir(&subject_dir).is_dir());
    assert!(subject_dir.join("triggers.txt").is_file());

    for modality in Modality::ALL {
        let config = load(&settings, &subject_dir, modality);
        config.check(None).unwrap();
        assert_eq!(config.structure.runner, "bci-protocol");
    }

    assert!(matches!(
        create_subject(&settings, "S01", "mi"),
        Err(ConfigError::SubjectExists(_))
    ));
    assert!(create_subject(&settings, "a/b", "mi").is_err());
    assert!(create_subject(&settings, "S02", "nope").is_err());
}

#[test]
fn config_lookup_by_modality_tag() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    std::fs::write(dir.join("config_trainer-mi.json"), "{}").unwrap();
    std::fs::write(dir.join("config_structure_trainer.json"), "{}").unwrap();

    let found = find_subject_config(dir, Modality::Train).unwrap();
    assert_eq!(found.file_name().unwrap(), "config_trainer-mi.json");
    assert!(matches!(
        find_subject_config(dir, Modality::Online),
        Err(ConfigError::SubjectConfigMissing { .. })
    ));

    assert_eq!(protocol_of(&found).unwrap(), "mi");
    assert!(matches!(protocol_of(Path::new("config.json")), Err(ConfigError::NoProtocol(_))));
}

#[test]
fn missing_structure_is_reported() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(&tmp);
    let subject_dir = tmp.path().join("S01-xyz");
    std::fs::create_dir_all(&subject_dir).unwrap();
    std::fs::write(subject_dir.join("config_online-xyz.json"), "{}").unwrap();

    assert!(matches!(
        prepare_config_files(&settings, &subject_dir, Modality::Online),
        Err(ConfigError::StructureMissing { .. })
    ));
}

#[test]
fn record_policies() {
    assert_eq!(Modality::Offline.record_policy(), RecordPolicy::Forced(true));
    assert_eq!(Modality::Train.record_policy(), RecordPolicy::Forced(false));
    let online = Modality::Online.record_policy();
    assert!(online.default_value());
    assert!(!online.is_locked());
    assert_eq!(Modality::from_tag("train"), Some(Modality::Train));
    assert_eq!(Modality::Train.tag(), "trainer");
}

#[test]
fn selectable_keeps_other_entries() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(&tmp);
    let subject_dir = create_subject(&settings, "S01", "mi").unwrap();
    let mut config = load(&settings, &subject_dir, Modality::Train);

    config.set_param("CLASSIFIER", json!("svm")).unwrap();
    let classifier = config.get("CLASSIFIER").unwrap();
    assert_eq!(classifier["selected"], "svm");
    assert_eq!(classifier["lda"], json!({"shrinkage": "auto"}));

    config
        .set_param("CLASSIFIER", json!({"selected": "lda", "lda": {"shrinkage": 0.1}, "svm": {}}))
        .unwrap();
    let classifier = config.get("CLASSIFIER").unwrap();
    assert_eq!(classifier["selected"], "lda");
    assert_eq!(classifier["lda"], json!({"shrinkage": 0.1}));
    // alternatives that were not selected are untouched
    assert_eq!(classifier["svm"]["kernel"], "linear");

    assert!(config.set_param("CLASSIFIER", json!("knn")).is_err());
    assert!(matches!(
        config.set_param("NOT_A_PARAM", json!(1)),
        Err(ConfigError::UnknownParameter(_))
    ));
}

#[test]
fn check_rejects_bad_values() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(&tmp);
    let subject_dir = create_subject(&settings, "S01", "mi").unwrap();

    let mut config = load(&settings, &subject_dir, Modality::Online);
    config.set_param("BIAS", json!("FEET")).unwrap();
    assert!(config.check(None).is_err());
    config.set_param("BIAS", json!("LEFT_HAND")).unwrap();
    config.check(None).unwrap();

    config.set_param("DIRECTIONS", json!(["LEFT_HAND", "JUMP"])).unwrap();
    assert!(config.check(None).is_err());
    config
        .set_param("DIRECTIONS", json!(["LEFT_HAND", "RIGHT_HAND", "FEET", "TONGUE", "LEFT_HAND"]))
        .unwrap();
    assert!(config.check(None).is_err());

    let mut config = load(&settings, &subject_dir, Modality::Online);
    config.set_param("TRIALS_NB", json!(0)).unwrap();
    assert!(config.check(None).is_err());

    let mut config = load(&settings, &subject_dir, Modality::Online);
    config.set_param("FEEDBACK", json!("sound")).unwrap();
    assert!(config.check(None).is_err());
}

#[test]
fn channels_are_checked_against_the_channel_list() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(&tmp);
    let subject_dir = create_subject(&settings, "S01", "mi").unwrap();
    assert_eq!(read_channels(&settings, &subject_dir).unwrap(), None);

    std::fs::write(settings.channels_file(&subject_dir), "C3 Cz\nC4\n").unwrap();
    let channels = read_channels(&settings, &subject_dir).unwrap().unwrap();
    assert_eq!(channels, ["C3", "Cz", "C4"]);

    let mut config = load(&settings, &subject_dir, Modality::Train);
    config.check(Some(&channels)).unwrap();
    config.set_param("CHANNELS", json!(["C3", "O1"])).unwrap();
    let err = config.check(Some(&channels)).unwrap_err();
    assert!(err.to_string().contains("O1"), "{}", err);
}

#[test]
fn timestamped_save_sits_next_to_the_subject_file() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(&tmp);
    let subject_dir = create_subject(&settings, "S01", "mi").unwrap();
    let config = load(&settings, &subject_dir, Modality::Offline);

    let now = Local.with_ymd_and_hms(2025, 3, 7, 14, 5, 0).unwrap();
    let path = config.default_save_path(now);
    assert_eq!(path, subject_dir.join("config_offline-mi_03.07.14.05.json"));

    config.save(&path).unwrap();
    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(&saved, &Value::Object(config.values().clone()));

    // the original still wins the lookup
    let found = find_subject_config(&subject_dir, Modality::Offline).unwrap();
    assert_eq!(found.file_name().unwrap(), "config_offline-mi.json");
}

#[test]
fn run_snapshot_feeds_the_protocol() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(&tmp);
    let subject_dir = create_subject(&settings, "S01", "mi").unwrap();
    let config = load(&settings, &subject_dir, Modality::Offline);

    let record_dir = settings.record_dir(&subject_dir);
    let path = config.write_run_snapshot(&record_dir, Modality::Offline).unwrap();
    assert!(path.starts_with(&record_dir));

    let snapshot = RunSnapshot::load(&path).unwrap();
    assert_eq!(snapshot.modality, Modality::Offline);
    assert_eq!(snapshot.protocol, "mi");
    let trigger_file = PathBuf::from(snapshot.params["TRIGGER_FILE"].as_str().unwrap());
    assert!(trigger_file.is_absolute());

    let params = ProtocolParams::from_snapshot(&snapshot).unwrap();
    assert_eq!(params.trials, 40);
    assert_eq!(params.directions, ["LEFT_HAND", "RIGHT_HAND"]);
    assert_eq!(params.code_for("LEFT_HAND"), Some(10));
    assert_eq!(params.timings.dir, 4.0);
    assert_eq!(params.seed, Some(1));
}
