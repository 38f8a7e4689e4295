//! Parameter schema loaded from a protocol's structure file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};

/// Widget/validation kind of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamKind {
    Int {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    Float {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Bool,
    Text {
        #[serde(default)]
        nullable: bool,
    },
    /// One of a fixed set of values.
    Choice { options: Vec<Value> },
    Dir,
    File,
    /// Free list the operator may edit.
    List,
    Dict,
    /// Object with a `selected` key naming one of its other entries.
    Selectable,
    /// Electrode names, checked against the subject's channel list.
    Channels,
    /// Up to `count` directions; `options` defaults to the trigger names.
    Directions {
        count: usize,
        #[serde(default)]
        options: Option<Vec<String>>,
    },
    /// One of the chosen directions, or null for no bias.
    Bias,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ParamKind,
    #[serde(default)]
    pub help: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamGroup {
    Basic,
    Advanced,
}

/// Schema of one protocol/modality pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureFile {
    pub protocol: String,
    pub modality: String,
    /// Binary that runs the protocol.
    #[serde(default = "default_runner")]
    pub runner: String,
    #[serde(default)]
    pub basic: Vec<ParamSpec>,
    #[serde(default)]
    pub advanced: Vec<ParamSpec>,
}

fn default_runner() -> String {
    "bci-protocol".to_string()
}

impl StructureFile {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::json(path, e))
    }

    /// All parameters, basic first.
    pub fn params(&self) -> impl Iterator<Item = (ParamGroup, &ParamSpec)> {
        self.basic
            .iter()
            .map(|p| (ParamGroup::Basic, p))
            .chain(self.advanced.iter().map(|p| (ParamGroup::Advanced, p)))
    }

    pub fn find(&self, name: &str) -> Option<&ParamSpec> {
        self.params().map(|(_, p)| p).find(|p| p.name == name)
    }
}

/// Side information some checks need.
#[derive(Debug, Default)]
pub struct CheckContext<'a> {
    pub channels: Option<&'a [String]>,
    pub trigger_names: Option<&'a [String]>,
    /// Directions chosen in the same config, for `Bias`.
    pub directions: &'a [String],
}

fn string_list(name: &str, value: &Value) -> ConfigResult<Vec<String>> {
    let arr = value
        .as_array()
        .ok_or_else(|| ConfigError::invalid(name, "expected a list"))?;
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| ConfigError::invalid(name, format!("expected strings, got {}", v)))
        })
        .collect()
}

impl ParamKind {
    /// Check a value against this kind.
    pub fn check(&self, name: &str, value: &Value, ctx: &CheckContext<'_>) -> ConfigResult<()> {
        match self {
            ParamKind::Int { min, max } => {
                let v = value
                    .as_i64()
                    .ok_or_else(|| ConfigError::invalid(name, "expected an integer"))?;
                if let Some(min) = min
                    && v < *min
                {
                    return Err(ConfigError::invalid(name, format!("{} is below the minimum {}", v, min)));
                }
                if let Some(max) = max
                    && v > *max
                {
                    return Err(ConfigError::invalid(name, format!("{} is above the maximum {}", v, max)));
                }
            }
            ParamKind::Float { min, max } => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| ConfigError::invalid(name, "expected a number"))?;
                if let Some(min) = min
                    && v < *min
                {
                    return Err(ConfigError::invalid(name, format!("{} is below the minimum {}", v, min)));
                }
                if let Some(max) = max
                    && v > *max
                {
                    return Err(ConfigError::invalid(name, format!("{} is above the maximum {}", v, max)));
                }
            }
            ParamKind::Bool => {
                if !value.is_boolean() {
                    return Err(ConfigError::invalid(name, "expected true or false"));
                }
            }
            ParamKind::Text { nullable } => {
                if !(value.is_string() || (*nullable && value.is_null())) {
                    return Err(ConfigError::invalid(name, "expected text"));
                }
            }
            ParamKind::Choice { options } => {
                if !options.contains(value) {
                    return Err(ConfigError::invalid(name, format!("{} is not one of the allowed options", value)));
                }
            }
            ParamKind::Dir | ParamKind::File => {
                if !(value.is_string() || value.is_null()) {
                    return Err(ConfigError::invalid(name, "expected a path"));
                }
            }
            ParamKind::List => {
                if !value.is_array() {
                    return Err(ConfigError::invalid(name, "expected a list"));
                }
            }
            ParamKind::Dict => {
                if !value.is_object() {
                    return Err(ConfigError::invalid(name, "expected a mapping"));
                }
            }
            ParamKind::Selectable => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| ConfigError::invalid(name, "expected a mapping with 'selected'"))?;
                let selected = obj
                    .get("selected")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ConfigError::invalid(name, "missing 'selected' entry"))?;
                if !obj.contains_key(selected) {
                    return Err(ConfigError::invalid(name, format!("selected entry '{}' does not exist", selected)));
                }
            }
            ParamKind::Channels => {
                let chosen = string_list(name, value)?;
                if let Some(known) = ctx.channels
                    && let Some(bad) = chosen.iter().find(|c| !known.contains(c))
                {
                    return Err(ConfigError::invalid(name, format!("unknown channel '{}'", bad)));
                }
            }
            ParamKind::Directions { count, options } => {
                let chosen = string_list(name, value)?;
                if chosen.is_empty() || chosen.len() > *count {
                    return Err(ConfigError::invalid(
                        name,
                        format!("expected between 1 and {} directions, got {}", count, chosen.len()),
                    ));
                }
                let allowed = options.as_deref().or(ctx.trigger_names);
                if let Some(allowed) = allowed
                    && let Some(bad) = chosen.iter().find(|d| !allowed.contains(d))
                {
                    return Err(ConfigError::invalid(name, format!("unknown direction '{}'", bad)));
                }
            }
            ParamKind::Bias => {
                if value.is_null() {
                    return Ok(());
                }
                let bias = value
                    .as_str()
                    .ok_or_else(|| ConfigError::invalid(name, "expected a direction or null"))?;
                if !ctx.directions.iter().any(|d| d == bias) {
                    return Err(ConfigError::invalid(name, format!("'{}' is not one of the chosen directions", bias)));
                }
            }
        }
        Ok(())
    }
}
