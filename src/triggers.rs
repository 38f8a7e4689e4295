//! Trigger definition files: one `NAME VALUE` pair per line, `#` starts a comment.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerDef {
    by_name: BTreeMap<String, i32>,
    by_value: BTreeMap<i32, String>,
    /// Names in file order.
    order: Vec<String>,
}

impl TriggerDef {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> ConfigResult<Self> {
        let mut def = TriggerDef::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(name), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(ConfigError::TriggerSyntax {
                    line: idx + 1,
                    reason: format!("expected 'NAME VALUE', got '{}'", line),
                });
            };
            let value: i32 = value.parse().map_err(|_| ConfigError::TriggerSyntax {
                line: idx + 1,
                reason: format!("'{}' is not an integer", value),
            })?;
            if def.by_name.contains_key(name) {
                return Err(ConfigError::TriggerSyntax {
                    line: idx + 1,
                    reason: format!("duplicate name '{}'", name),
                });
            }
            def.by_name.insert(name.to_string(), value);
            def.by_value.entry(value).or_insert_with(|| name.to_string());
            def.order.push(name.to_string());
        }
        Ok(def)
    }

    pub fn by_name(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }

    pub fn by_value(&self, value: i32) -> Option<&str> {
        self.by_value.get(&value).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
