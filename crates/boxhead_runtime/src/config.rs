//! Configuration snapshot
//!
//! The runtime never owns configuration. A plugin sees it once, during
//! `on_init`, through this trait and copies out whatever it needs.

use std::time::Duration;

use toml::Value;

/// Read-only view of the configuration handed to a plugin at construction
///
/// Every accessor returns an owned value. The typed accessors fall back to
/// the given default when the key is missing or holds the wrong type.
pub trait ConfigSnapshot {
    /// Look up the value at `path`, e.g. `["plugins", "example", "smile"]`
    fn value(&self, path: &[&str]) -> Option<Value>;

    fn get_str(&self, path: &[&str], default: &str) -> String {
        match self.value(path) {
            Some(Value::String(s)) => s,
            Some(other) => mismatch(path, "string", &other, default.to_string()),
            None => default.to_string(),
        }
    }

    fn get_int(&self, path: &[&str], default: i64) -> i64 {
        match self.value(path) {
            Some(Value::Integer(i)) => i,
            Some(other) => mismatch(path, "integer", &other, default),
            None => default,
        }
    }

    /// Integers are widened to floats
    fn get_float(&self, path: &[&str], default: f64) -> f64 {
        match self.value(path) {
            Some(Value::Float(f)) => f,
            Some(Value::Integer(i)) => i as f64,
            Some(other) => mismatch(path, "float", &other, default),
            None => default,
        }
    }

    fn get_bool(&self, path: &[&str], default: bool) -> bool {
        match self.value(path) {
            Some(Value::Boolean(b)) => b,
            Some(other) => mismatch(path, "boolean", &other, default),
            None => default,
        }
    }

    /// A list of strings; non-string entries make the whole value fall back
    fn get_list_str(&self, path: &[&str], default: &[&str]) -> Vec<String> {
        let fallback = || -> Vec<String> { default.iter().map(|s| s.to_string()).collect() };
        match self.value(path) {
            Some(Value::Array(items)) => {
                let strings: Option<Vec<String>> = items
                    .iter()
                    .map(|item| item.as_str().map(String::from))
                    .collect();
                match strings {
                    Some(strings) => strings,
                    None => mismatch(path, "list of strings", &Value::Array(items), fallback()),
                }
            }
            Some(other) => mismatch(path, "list of strings", &other, fallback()),
            None => fallback(),
        }
    }

    /// A non-negative integer number of milliseconds
    fn get_duration_ms(&self, path: &[&str], default: Duration) -> Duration {
        match self.value(path) {
            Some(Value::Integer(ms)) if ms >= 0 => Duration::from_millis(ms as u64),
            Some(other) => mismatch(path, "duration in milliseconds", &other, default),
            None => default,
        }
    }
}

fn mismatch<T>(path: &[&str], expected: &str, found: &Value, default: T) -> T {
    tracing::warn!(
        path = %path.join("."),
        expected,
        found = found.type_str(),
        "Config value has the wrong type, using default"
    );
    default
}

/// An empty snapshot, every lookup yields the default
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyConfig;

impl ConfigSnapshot for EmptyConfig {
    fn value(&self, _path: &[&str]) -> Option<Value> {
        None
    }
}

impl ConfigSnapshot for toml::Table {
    fn value(&self, path: &[&str]) -> Option<Value> {
        let (last, sections) = path.split_last()?;
        let mut table = self;
        for section in sections {
            table = table.get(*section)?.as_table()?;
        }
        table.get(*last).cloned()
    }
}
