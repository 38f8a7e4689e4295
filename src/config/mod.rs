//! Typed experiment configuration.
//!
//! A protocol ships *structure files* (the parameter schema, one per
//! modality) and *template files* (default subject configs). A subject folder
//! holds one JSON config per modality whose file stem ends in `-<protocol>`.
//!
//! ```text
//! $BCI_ROOT/config_files/<protocol>/structure_files/config_structure_<modality>.json
//! $BCI_ROOT/config_files/<protocol>/template_files/config_<modality>-<protocol>.json
//! $BCI_SCRIPTS/<subject>-<protocol>/config_<modality>-<protocol>.json
//! $BCI_DATA/<subject>-<protocol>/                  (recordings, channelsList.txt)
//! ```

pub mod experiment;
pub mod schema;
pub mod subject;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use experiment::ExperimentConfig;
pub use schema::{ParamGroup, ParamKind, ParamSpec, StructureFile};

/// Filesystem layout the launcher works in.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Installation root holding `config_files/`.
    pub root: PathBuf,
    /// Where recordings are written.
    pub data: PathBuf,
    /// Where subject folders live.
    pub scripts: PathBuf,
}

impl Settings {
    pub fn new(root: impl Into<PathBuf>, data: impl Into<PathBuf>, scripts: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            data: data.into(),
            scripts: scripts.into(),
        }
    }

    pub fn config_files_dir(&self) -> PathBuf {
        self.root.join("config_files")
    }

    pub fn structure_dir(&self, protocol: &str) -> PathBuf {
        self.config_files_dir().join(protocol).join("structure_files")
    }

    pub fn template_dir(&self, protocol: &str) -> PathBuf {
        self.config_files_dir().join(protocol).join("template_files")
    }

    /// Protocols that ship a `config_files/<protocol>/` folder, sorted.
    pub fn protocols(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.config_files_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    /// Recording directory of a subject: `$BCI_DATA/<subject folder name>`.
    pub fn record_dir(&self, subject_dir: &Path) -> PathBuf {
        match subject_dir.file_name() {
            Some(name) => self.data.join(name),
            None => self.data.clone(),
        }
    }

    pub fn channels_file(&self, subject_dir: &Path) -> PathBuf {
        self.record_dir(subject_dir).join("channelsList.txt")
    }
}

/// Experiment phase selected in the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Offline,
    Train,
    Online,
}

/// Whether a modality records the amplifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPolicy {
    /// The operator cannot change it.
    Forced(bool),
    Optional { default: bool },
}

impl RecordPolicy {
    pub fn default_value(self) -> bool {
        match self {
            RecordPolicy::Forced(v) => v,
            RecordPolicy::Optional { default } => default,
        }
    }

    pub fn is_locked(self) -> bool {
        matches!(self, RecordPolicy::Forced(_))
    }
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Offline, Modality::Train, Modality::Online];

    /// Tag used in config file names.
    pub fn tag(self) -> &'static str {
        match self {
            Modality::Offline => "offline",
            Modality::Train => "trainer",
            Modality::Online => "online",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "offline" => Some(Modality::Offline),
            "trainer" | "train" => Some(Modality::Train),
            "online" => Some(Modality::Online),
            _ => None,
        }
    }

    pub fn record_policy(self) -> RecordPolicy {
        match self {
            Modality::Offline => RecordPolicy::Forced(true),
            Modality::Train => RecordPolicy::Forced(false),
            Modality::Online => RecordPolicy::Optional { default: true },
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Modality::Offline => "Offline",
            Modality::Train => "Train",
            Modality::Online => "Online",
        };
        f.write_str(name)
    }
}
