//! Configuration
//!
//! A layered TOML configuration: built-in defaults, the user's config file,
//! then command-line overrides. Plugins only ever see it through
//! [`ConfigSnapshot`].

mod loader;
mod overrides;

pub use loader::*;
pub use overrides::*;

use std::path::PathBuf;

use boxhead_runtime::ConfigSnapshot;
use toml::{Table, Value};

/// Built-in defaults, shipped with the binary
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Error type for configuration handling
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config path too short: {0:?} (expected a section and a key)")]
    PathTooShort(Vec<String>),

    #[error("Config path {0} runs through a value that is not a table")]
    NotATable(String),

    #[error("Did not understand option \"{0}\"")]
    InvalidOverride(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// The application's configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    table: Table,
}

impl Config {
    /// An empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(table: Table) -> Self {
        Self { table }
    }

    /// Parse a TOML document; `origin` names it in errors
    pub fn parse(content: &str, origin: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let table = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.into(),
            source,
        })?;
        Ok(Self { table })
    }

    /// The built-in defaults
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::parse(DEFAULT_CONFIG, "<defaults>")
    }

    pub fn as_table(&self) -> &Table {
        &self.table
    }

    /// Get the value at `path`
    ///
    /// A path needs at least a section and a key.
    pub fn get(&self, path: &[&str]) -> Result<Option<&Value>, ConfigError> {
        let (key, sections) = split_path(path)?;

        let mut table = &self.table;
        for section in sections {
            match table.get(*section).and_then(Value::as_table) {
                Some(inner) => table = inner,
                None => return Ok(None),
            }
        }
        Ok(table.get(key))
    }

    /// Set the value at `path`, creating missing sections on the way
    pub fn set(&mut self, path: &[&str], value: Value) -> Result<(), ConfigError> {
        let (key, sections) = split_path(path)?;

        let mut table = &mut self.table;
        for section in sections {
            table = table
                .entry(section.to_string())
                .or_insert(Value::Table(Table::new()))
                .as_table_mut()
                .ok_or_else(|| ConfigError::NotATable(path.join(".")))?;
        }
        table.insert(key.to_string(), value);
        Ok(())
    }

    pub fn set_str(&mut self, path: &[&str], value: impl Into<String>) -> Result<(), ConfigError> {
        self.set(path, Value::String(value.into()))
    }

    /// Merge another layer on top of this one
    ///
    /// Tables merge key by key; any other value in `layer` replaces ours.
    pub fn merge(&mut self, layer: Table) {
        merge_tables(&mut self.table, layer);
    }
}

impl ConfigSnapshot for Config {
    fn value(&self, path: &[&str]) -> Option<Value> {
        self.get(path).ok().flatten().cloned()
    }
}

fn split_path<'a, 'p>(path: &'a [&'p str]) -> Result<(&'p str, &'a [&'p str]), ConfigError> {
    match path.split_last() {
        Some((key, sections)) if !sections.is_empty() => Ok((*key, sections)),
        _ => Err(ConfigError::PathTooShort(
            path.iter().map(|s| s.to_string()).collect(),
        )),
    }
}

fn merge_tables(base: &mut Table, layer: Table) {
    for (key, value) in layer {
        match value {
            Value::Table(incoming) => match base.get_mut(&key) {
                Some(Value::Table(existing)) => merge_tables(existing, incoming),
                _ => {
                    base.insert(key, Value::Table(incoming));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}
