use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Invalid run-state code: {0} (expected 0, 1 or 2)")]
    InvalidCode(i64),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "Config file missing: copy an {modality} config file to the subject folder or create a new subject"
    )]
    SubjectConfigMissing { modality: String },

    #[error("No {modality} structure file found in {}", .dir.display())]
    StructureMissing { modality: String, dir: PathBuf },

    #[error("Cannot infer the protocol from config file name: {0}")]
    NoProtocol(String),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Parameter {name} is missing from the subject config")]
    MissingParameter { name: String },

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Subject folder already exists: {}", .0.display())]
    SubjectExists(PathBuf),

    #[error("Environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("Invalid trigger definition at line {line}: {reason}")]
    TriggerSyntax { line: usize, reason: String },

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        ConfigError::Json {
            path: path.into(),
            source,
        }
    }

    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("'timeout' must be a strictly positive integer")]
    InvalidTimeout,

    #[error("'minimum' must be a strictly positive integer")]
    InvalidMinimum,

    #[error("No amplifier found matching {0}")]
    NotFound(String),

    #[error("LSL error: {0}")]
    Lsl(String),
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("No recording directory was provided.")]
    NoRecordDir,

    #[error("Recorder is not connected to an amplifier")]
    NotConnected,

    #[error("Recorder is already running")]
    AlreadyRecording,

    #[error("Recorder did not finish within {0:?}")]
    Unresponsive(std::time::Duration),

    #[error("Recording thread failed: {0}")]
    Failed(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
