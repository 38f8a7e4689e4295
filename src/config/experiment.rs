use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Modality;
use super::schema::{CheckContext, ParamKind, StructureFile};
use crate::error::{ConfigError, ConfigResult};
use crate::triggers::TriggerDef;

/// Subject config values bound to their schema.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub structure: StructureFile,
    /// File the values were loaded from (relative paths resolve against its folder).
    pub subject_path: PathBuf,
    values: Map<String, Value>,
}

/// What the protocol runner receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub protocol: String,
    pub modality: Modality,
    pub subject_dir: PathBuf,
    pub record_dir: PathBuf,
    pub created_at: String,
    pub params: Map<String, Value>,
}

impl RunSnapshot {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::json(path, e))
    }
}

impl ExperimentConfig {
    pub fn load(structure_path: &Path, subject_path: &Path) -> ConfigResult<Self> {
        let structure = StructureFile::load(structure_path)?;
        let text = std::fs::read_to_string(subject_path).map_err(|e| ConfigError::io(subject_path, e))?;
        let values: Map<String, Value> =
            serde_json::from_str(&text).map_err(|e| ConfigError::json(subject_path, e))?;

        for (_, spec) in structure.params() {
            if !values.contains_key(&spec.name) {
                tracing::warn!("{} has no value for {}", subject_path.display(), spec.name);
            }
        }

        Ok(Self {
            structure,
            subject_path: subject_path.to_path_buf(),
            values,
        })
    }

    pub fn from_parts(structure: StructureFile, subject_path: PathBuf, values: Map<String, Value>) -> Self {
        Self {
            structure,
            subject_path,
            values,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn subject_dir(&self) -> &Path {
        self.subject_path.parent().unwrap_or(Path::new("."))
    }

    /// Resolve a path-valued parameter relative to the subject folder.
    pub fn path_param(&self, name: &str) -> Option<PathBuf> {
        let raw = self.get(name)?.as_str()?;
        let path = PathBuf::from(raw);
        Some(if path.is_absolute() {
            path
        } else {
            self.subject_dir().join(path)
        })
    }

    /// Trigger definition named by the `TRIGGER_FILE` parameter, if any.
    pub fn trigger_def(&self) -> ConfigResult<Option<TriggerDef>> {
        match self.path_param("TRIGGER_FILE") {
            Some(path) => TriggerDef::load(&path).map(Some),
            None => Ok(None),
        }
    }

    /// Update one parameter.
    ///
    /// For selectable mappings only `selected` and the selected entry change:
    /// the other alternatives keep their settings. A bare string selects an
    /// existing entry.
    pub fn set_param(&mut self, name: &str, value: Value) -> ConfigResult<()> {
        let is_selectable = matches!(
            self.structure.find(name).map(|p| &p.kind),
            Some(ParamKind::Selectable)
        );
        if self.structure.find(name).is_none() && !self.values.contains_key(name) {
            return Err(ConfigError::UnknownParameter(name.to_string()));
        }

        let current = self.values.get_mut(name);
        match (current, value) {
            (Some(Value::Object(cur)), Value::Object(new)) if cur.contains_key("selected") => {
                let selected = new
                    .get("selected")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ConfigError::invalid(name, "missing 'selected' entry"))?
                    .to_string();
                cur.insert("selected".to_string(), Value::String(selected.clone()));
                if let Some(entry) = new.get(&selected) {
                    cur.insert(selected.clone(), entry.clone());
                }
                tracing::info!("{} selected {}", name, selected);
            }
            (Some(Value::Object(cur)), Value::String(selected)) if is_selectable => {
                if !cur.contains_key(&selected) {
                    return Err(ConfigError::invalid(name, format!("no entry named '{}'", selected)));
                }
                tracing::info!("{} selected {}", name, selected);
                cur.insert("selected".to_string(), Value::String(selected));
            }
            (_, value) => {
                tracing::info!("{} = {}", name, value);
                self.values.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// Validate every schema parameter.
    pub fn check(&self, channels: Option<&[String]>) -> ConfigResult<()> {
        let triggers = match self.trigger_def() {
            Ok(def) => def,
            Err(e) => {
                tracing::warn!("Cannot load trigger file: {}", e);
                None
            }
        };
        let trigger_names = triggers.as_ref().map(|t| t.names().to_vec());

        let directions: Vec<String> = self
            .structure
            .params()
            .find(|(_, p)| matches!(p.kind, ParamKind::Directions { .. }))
            .and_then(|(_, p)| self.get(&p.name))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let ctx = CheckContext {
            channels,
            trigger_names: trigger_names.as_deref(),
            directions: &directions,
        };

        for (_, spec) in self.structure.params() {
            let value = self.get(&spec.name).ok_or_else(|| ConfigError::MissingParameter {
                name: spec.name.clone(),
            })?;
            spec.kind.check(&spec.name, value, &ctx)?;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let text = serde_json::to_string_pretty(&self.values).map_err(|e| ConfigError::json(path, e))?;
        std::fs::write(path, text + "\n").map_err(|e| ConfigError::io(path, e))
    }

    /// `<stem>_<month>.<day>.<hour>.<minute>.json` next to the subject file.
    pub fn default_save_path(&self, now: DateTime<Local>) -> PathBuf {
        let stem = self
            .subject_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "config".to_string());
        let name = format!("{}_{}.json", stem, now.format("%m.%d.%H.%M"));
        self.subject_path.with_file_name(name)
    }

    /// Save under [`default_save_path`](Self::default_save_path).
    pub fn save_timestamped(&self) -> ConfigResult<PathBuf> {
        let path = self.default_save_path(Local::now());
        self.save(&path)?;
        tracing::info!("Saved config to {}", path.display());
        Ok(path)
    }

    /// Write the values handed to the protocol runner into `record_dir`.
    pub fn write_run_snapshot(&self, record_dir: &Path, modality: Modality) -> ConfigResult<PathBuf> {
        std::fs::create_dir_all(record_dir).map_err(|e| ConfigError::io(record_dir, e))?;

        let mut params = self.values.clone();
        // the runner does not know the subject folder, so hand it absolute paths
        for (_, spec) in self.structure.params() {
            if matches!(spec.kind, ParamKind::Dir | ParamKind::File)
                && let Some(path) = self.path_param(&spec.name)
            {
                params.insert(spec.name.clone(), Value::String(path.to_string_lossy().to_string()));
            }
        }

        let now = Local::now();
        let snapshot = RunSnapshot {
            protocol: self.structure.protocol.clone(),
            modality,
            subject_dir: self.subject_dir().to_path_buf(),
            record_dir: record_dir.to_path_buf(),
            created_at: now.to_rfc3339(),
            params,
        };
        let path = record_dir.join(format!("{}_{}.json", modality.tag(), now.format("%Y%m%d-%H%M%S")));
        let text = serde_json::to_string_pretty(&snapshot).map_err(|e| ConfigError::json(&path, e))?;
        std::fs::write(&path, text).map_err(|e| ConfigError::io(&path, e))?;
        Ok(path)
    }
}
