//! Glue between the configuration form and a running session.

use anyhow::{Context, Result, bail};
use serde_json::Value;

use bci_launcher::cli::RecorderArgs;
use bci_launcher::config::subject::read_channels;
use bci_launcher::config::{ExperimentConfig, Modality, ParamGroup, ParamKind, ParamSpec, Settings};
use bci_launcher::error::{ConfigError, ConfigResult};
use bci_launcher::lsl::AmpInfo;
use bci_launcher::process::find_binary;
use bci_launcher::session::{ChildCommand, Session, SessionHandle, SessionPlan};

use super::form::{FieldType, FormField, FormState};

pub const AMP_FIELD: &str = "Amplifier";
pub const RECORD_FIELD: &str = "Record";
const NO_AMP: &str = "(no amplifier found)";
const NO_BIAS: &str = "none";

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn names(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn selectable_entries(value: Option<&Value>) -> (Vec<String>, String) {
    let Some(obj) = value.and_then(Value::as_object) else {
        return (Vec::new(), String::new());
    };
    let entries = obj.keys().filter(|k| *k != "selected").cloned().collect();
    let selected = obj.get("selected").map(display).unwrap_or_default();
    (entries, selected)
}

/// Form row for one schema parameter, filled with the config's value.
fn field_for(spec: &ParamSpec, group: ParamGroup, config: &ExperimentConfig, directions: &[String]) -> FormField {
    let current = config.get(&spec.name);
    let text = current.map(display).unwrap_or_default();
    let field = match &spec.kind {
        ParamKind::Int { .. } => FormField::new(&spec.name, FieldType::Integer, text),
        ParamKind::Float { .. } => FormField::new(&spec.name, FieldType::Float, text),
        ParamKind::Bool => FormField::bool_field(&spec.name, current.and_then(Value::as_bool).unwrap_or(false)),
        ParamKind::Text { .. } => FormField::new(&spec.name, FieldType::Text, text),
        ParamKind::Choice { options } => {
            FormField::select_field(&spec.name, options.iter().map(display).collect(), &text)
        }
        ParamKind::Dir => FormField::new(&spec.name, FieldType::Path { select_dir: true }, text),
        ParamKind::File => FormField::new(&spec.name, FieldType::Path { select_dir: false }, text),
        ParamKind::List | ParamKind::Dict => {
            let json = current.map(Value::to_string).unwrap_or_default();
            FormField::new(&spec.name, FieldType::Json, json)
        }
        ParamKind::Selectable => {
            let (entries, selected) = selectable_entries(current);
            FormField::select_field(&spec.name, entries, &selected)
        }
        ParamKind::Channels | ParamKind::Directions { .. } => {
            FormField::new(&spec.name, FieldType::Names, names(current).join(", "))
        }
        ParamKind::Bias => {
            let mut options = vec![NO_BIAS.to_string()];
            options.extend(directions.iter().cloned());
            let selected = if text.is_empty() { NO_BIAS.to_string() } else { text };
            FormField::select_field(&spec.name, options, &selected)
        }
    };
    field.with_help(&spec.help).with_kind(spec.kind.clone(), group)
}

fn amp_options(amps: &[AmpInfo]) -> Vec<String> {
    if amps.is_empty() {
        vec![NO_AMP.to_string()]
    } else {
        amps.iter().map(AmpInfo::label).collect()
    }
}

/// Schema fields (basic then advanced), then the amplifier and record fields.
pub fn build_config_form(title: &str, config: &ExperimentConfig, modality: Modality, amps: &[AmpInfo]) -> FormState {
    let directions = config
        .structure
        .params()
        .find(|(_, p)| matches!(p.kind, ParamKind::Directions { .. }))
        .map(|(_, p)| names(config.get(&p.name)))
        .unwrap_or_default();

    let mut fields: Vec<FormField> = config
        .structure
        .params()
        .map(|(group, spec)| field_for(spec, group, config, &directions))
        .collect();

    let policy = modality.record_policy();
    fields.push(
        FormField::select_field(AMP_FIELD, amp_options(amps), "")
            .with_help("Amplifier to record from; toggle the scan in the menu to refresh"),
    );
    fields.push(
        FormField::bool_field(RECORD_FIELD, policy.default_value())
            .locked(policy.is_locked())
            .with_help("Record the amplifier during the run"),
    );

    FormState::new(title, fields)
}

/// Refresh the amplifier choices of an open form.
pub fn update_amp_options(form: &mut FormState, amps: &[AmpInfo]) {
    if let Some(field) = form.field_mut(AMP_FIELD) {
        field.set_options(amp_options(amps));
    }
}

/// Convert a field back to the JSON value of its parameter.
pub fn field_value(field: &FormField) -> ConfigResult<Option<Value>> {
    let Some(kind) = field.kind.as_ref() else {
        return Ok(None);
    };
    let name = field.name.as_str();
    let text = field.value.trim();
    let value = match kind {
        ParamKind::Int { .. } => Value::from(
            text.parse::<i64>()
                .map_err(|_| ConfigError::invalid(name, format!("'{}' is not an integer", text)))?,
        ),
        ParamKind::Float { .. } => {
            let v = text
                .parse::<f64>()
                .map_err(|_| ConfigError::invalid(name, format!("'{}' is not a number", text)))?;
            serde_json::Number::from_f64(v)
                .map(Value::Number)
                .ok_or_else(|| ConfigError::invalid(name, "not a finite number"))?
        }
        ParamKind::Bool => Value::Bool(field.is_true()),
        ParamKind::Text { nullable } => {
            if *nullable && text.is_empty() {
                Value::Null
            } else {
                Value::String(field.value.clone())
            }
        }
        ParamKind::Choice { options } => options
            .get(field.select_idx)
            .cloned()
            .ok_or_else(|| ConfigError::invalid(name, "no option selected"))?,
        ParamKind::Dir | ParamKind::File => {
            if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            }
        }
        ParamKind::List | ParamKind::Dict => {
            serde_json::from_str(text).map_err(|e| ConfigError::invalid(name, format!("invalid JSON: {}", e)))?
        }
        ParamKind::Selectable => Value::String(field.value.clone()),
        ParamKind::Channels | ParamKind::Directions { .. } => Value::Array(
            text.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
        ParamKind::Bias => {
            if field.value == NO_BIAS {
                Value::Null
            } else {
                Value::String(field.value.clone())
            }
        }
    };
    Ok(Some(value))
}

fn unchanged(current: Option<&Value>, new: &Value) -> bool {
    match (current, new) {
        (Some(Value::Object(cur)), Value::String(selected)) => cur.get("selected").and_then(Value::as_str) == Some(selected),
        (Some(cur), new) => cur == new,
        (None, _) => false,
    }
}

/// Write every edited schema field into the config.
pub fn apply_form(form: &FormState, config: &mut ExperimentConfig) -> ConfigResult<()> {
    for field in &form.fields {
        if let Some(value) = field_value(field)?
            && !unchanged(config.get(&field.name), &value)
        {
            config.set_param(&field.name, value)?;
        }
    }
    Ok(())
}

/// Amplifier and record choices of the form.
pub fn launch_choice<'a>(form: &FormState, amps: &'a [AmpInfo]) -> (Option<&'a AmpInfo>, bool) {
    let amp = form
        .field(AMP_FIELD)
        .and_then(|f| amps.iter().find(|a| a.label() == f.value));
    let record = form.field(RECORD_FIELD).is_some_and(FormField::is_true);
    (amp, record)
}

/// Validate the config, write the run snapshot and start the session.
///
/// Returns the handle and a one-line description for the tab header.
pub fn start_session(
    settings: &Settings,
    config: &ExperimentConfig,
    modality: Modality,
    amp: Option<&AmpInfo>,
    record: bool,
) -> Result<(SessionHandle, String)> {
    let subject_dir = config.subject_dir().to_path_buf();
    let channels = read_channels(settings, &subject_dir)?;
    config.check(channels.as_deref())?;

    let record_dir = settings.record_dir(&subject_dir);
    let snapshot = config.write_run_snapshot(&record_dir, modality)?;

    let protocol = ChildCommand {
        program: find_binary(&config.structure.runner),
        args: Vec::new(),
    };
    let mut description = format!("{} --config {}", protocol.program.display(), snapshot.display());
    let mut plan = SessionPlan::new(modality, protocol, snapshot);

    if record {
        let Some(amp) = amp else {
            bail!("Recording needs an amplifier: start the amplifier scan and pick one");
        };
        let subject = subject_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        let args = RecorderArgs {
            record_dir: Some(record_dir),
            amp_name: Some(amp.name.clone()),
            amp_serial: Some(amp.serial.clone()),
            interactive: true,
            subject,
            session_id: Some(uuid::Uuid::new_v4().to_string()),
            modality: Some(modality),
            ..Default::default()
        };
        description.push_str(&format!(" + recording {}", amp.label()));
        plan = plan.with_recorder(ChildCommand {
            program: find_binary("bci-recorder"),
            args: args.to_command_args(),
        });
    }

    let handle = Session::start(plan).context("Failed to start the session")?;
    Ok((handle, description))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bci_launcher::config::StructureFile;
    use serde_json::{Map, json};
    use std::path::PathBuf;

    fn form_values(form: &FormState) -> ConfigResult<Map<String, Value>> {
        let mut values = Map::new();
        for field in &form.fields {
            if let Some(value) = field_value(field)? {
                values.insert(field.name.clone(), value);
            }
        }
        Ok(values)
    }

    fn config() -> ExperimentConfig {
        let structure: StructureFile = serde_json::from_value(json!({
            "protocol": "mi",
            "modality": "offline",
            "basic": [
                {"name": "TRIALS_NB", "kind": "int", "min": 1},
                {"name": "DIRECTIONS", "kind": "directions", "count": 4},
                {"name": "BIAS", "kind": "bias"}
            ],
            "advanced": [
                {"name": "TIMINGS", "kind": "dict"},
                {"name": "CLASSIFIER", "kind": "selectable"},
                {"name": "NOTE", "kind": "text", "nullable": true}
            ]
        }))
        .unwrap();
        let values = json!({
            "TRIALS_NB": 20,
            "DIRECTIONS": ["LEFT", "RIGHT"],
            "BIAS": null,
            "TIMINGS": {"GAP": 1.0},
            "CLASSIFIER": {"selected": "lda", "lda": {"shrink": true}, "svm": {"c": 1}},
            "NOTE": null
        });
        let Value::Object(values) = values else { unreachable!() };
        ExperimentConfig::from_parts(structure, PathBuf::from("/tmp/S01-mi/config_offline-mi.json"), values)
    }

    #[test]
    fn form_follows_schema_then_launcher_fields() {
        let form = build_config_form("t", &config(), Modality::Offline, &[]);
        let names: Vec<&str> = form.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            ["TRIALS_NB", "DIRECTIONS", "BIAS", "TIMINGS", "CLASSIFIER", "NOTE", AMP_FIELD, RECORD_FIELD]
        );
        let record = form.field(RECORD_FIELD).unwrap();
        assert!(record.locked && record.is_true());
        assert_eq!(form.field("BIAS").unwrap().value, NO_BIAS);
        assert_eq!(form.field("DIRECTIONS").unwrap().value, "LEFT, RIGHT");
    }

    #[test]
    fn train_never_records() {
        let form = build_config_form("t", &config(), Modality::Train, &[]);
        let record = form.field(RECORD_FIELD).unwrap();
        assert!(record.locked && !record.is_true());
    }

    #[test]
    fn unedited_form_round_trips_values() {
        let config = config();
        let form = build_config_form("t", &config, Modality::Online, &[]);
        let values = form_values(&form).unwrap();
        assert_eq!(values["TRIALS_NB"], json!(20));
        assert_eq!(values["DIRECTIONS"], json!(["LEFT", "RIGHT"]));
        assert_eq!(values["BIAS"], Value::Null);
        assert_eq!(values["TIMINGS"], json!({"GAP": 1.0}));
        assert_eq!(values["CLASSIFIER"], json!("lda"));
        assert_eq!(values["NOTE"], Value::Null);
        assert!(!values.contains_key(AMP_FIELD));
    }

    #[test]
    fn apply_updates_edited_fields_only() {
        let mut config = config();
        let mut form = build_config_form("t", &config, Modality::Online, &[]);
        form.field_mut("TRIALS_NB").unwrap().value = "40".to_string();
        form.field_mut("CLASSIFIER").unwrap().next_option();
        form.field_mut("BIAS").unwrap().set_options(vec!["LEFT".into()]);

        apply_form(&form, &mut config).unwrap();
        assert_eq!(config.get("TRIALS_NB"), Some(&json!(40)));
        assert_eq!(config.get("BIAS"), Some(&json!("LEFT")));
        let classifier = config.get("CLASSIFIER").unwrap();
        assert_eq!(classifier["selected"], json!("svm"));
        assert_eq!(classifier["lda"], json!({"shrink": true}));
    }

    #[test]
    fn bad_numbers_are_reported_by_name() {
        let mut config = config();
        let mut form = build_config_form("t", &config, Modality::Online, &[]);
        form.field_mut("TRIALS_NB").unwrap().value = "-".to_string();
        let err = apply_form(&form, &mut config).unwrap_err();
        assert!(err.to_string().contains("TRIALS_NB"));
    }

    #[test]
    fn launch_choice_maps_amp_label() {
        let amp = AmpInfo {
            name: "Amp".into(),
            stream_type: "EEG".into(),
            serial: "42".into(),
            channels: 8,
            srate: 250.0,
            channel_format: "Float32".into(),
            source_id: "src".into(),
            hostname: "host".into(),
            uid: "uid".into(),
        };
        let amps = vec![amp];
        let form = build_config_form("t", &config(), Modality::Offline, &amps);
        let (chosen, record) = launch_choice(&form, &amps);
        assert_eq!(chosen.map(|a| a.serial.as_str()), Some("42"));
        assert!(record);
    }
}
