//! Command-line overrides
//!
//! Overrides come in one string, e.g.
//! `soundcontrol.max_volume=60@@plugins.inputdevinputevent.device=/dev/event0`.

use toml::Value;

use super::{Config, ConfigError};

/// Separator between overrides in one option string
pub const OVERRIDE_SEPARATOR: &str = "@@";

/// One parsed `section.key=value` override
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub path: Vec<String>,
    pub value: Value,
}

impl Override {
    /// Parse a single `section.key=value` entry
    ///
    /// The value is read as a TOML scalar or array when it parses as one,
    /// otherwise it is kept as a plain string.
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidOverride(entry.to_string());

        let (path, raw) = entry.split_once('=').ok_or_else(invalid)?;
        let path: Vec<String> = path.trim().split('.').map(|s| s.trim().to_string()).collect();
        if path.len() < 2 || path.iter().any(String::is_empty) {
            return Err(invalid());
        }

        Ok(Self {
            path,
            value: parse_value(raw.trim()),
        })
    }
}

fn parse_value(raw: &str) -> Value {
    toml::from_str::<toml::Table>(&format!("value = {}", raw))
        .ok()
        .and_then(|mut table| table.remove("value"))
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

impl Config {
    /// Apply an `@@`-separated override string
    ///
    /// Entries that cannot be understood are skipped and returned.
    pub fn apply_overrides(&mut self, options: &str) -> Vec<ConfigError> {
        let mut rejected = Vec::new();

        for entry in options.split(OVERRIDE_SEPARATOR).filter(|e| !e.trim().is_empty()) {
            let applied = Override::parse(entry).and_then(|o| {
                let path: Vec<&str> = o.path.iter().map(String::as_str).collect();
                self.set(&path, o.value)
            });
            if let Err(e) = applied {
                rejected.push(e);
            }
        }

        rejected
    }
}
