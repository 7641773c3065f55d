//! Built-in plugins
//!
//! Plugins are compiled in and looked up by the names listed in
//! `plugins.enabled`.

mod example;

pub use example::{DEFAULT_SMILE, Example, Output};

use boxhead_runtime::ConfigSnapshot;

use crate::supervisor::{Supervisor, SupervisorError};

type Spawner = fn(&Supervisor, &str, &dyn ConfigSnapshot) -> Result<(), SupervisorError>;

/// Name to constructor table
static REGISTRY: &[(&str, Spawner)] = &[("example", spawn_example)];

fn spawn_example(
    supervisor: &Supervisor,
    name: &str,
    config: &dyn ConfigSnapshot,
) -> Result<(), SupervisorError> {
    supervisor.spawn(name, Example::new(), config)
}

/// Names of all built-in plugins
pub fn available() -> Vec<&'static str> {
    REGISTRY.iter().map(|(name, _)| *name).collect()
}

/// Construct the plugin registered as `name` and hand it to the supervisor
pub fn spawn(
    supervisor: &Supervisor,
    name: &str,
    config: &dyn ConfigSnapshot,
) -> Result<(), SupervisorError> {
    let (_, spawner) = REGISTRY
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| SupervisorError::UnknownPlugin(name.to_string()))?;
    spawner(supervisor, name, config)
}

/// Spawn every plugin in `plugins.enabled`
///
/// Plugins that are unknown or fail to start are logged and skipped.
/// Returns the names that were started.
pub fn spawn_enabled(supervisor: &Supervisor, config: &dyn ConfigSnapshot) -> Vec<String> {
    let mut started = Vec::new();

    for name in config.get_list_str(&["plugins", "enabled"], &[]) {
        match spawn(supervisor, &name, config) {
            Ok(()) => started.push(name),
            Err(SupervisorError::UnknownPlugin(_)) => {
                tracing::error!(plugin = %name, available = ?available(), "Unknown plugin, skipping");
            }
            Err(e) => {
                tracing::error!(plugin = %name, error = %e, "Failed to start plugin");
            }
        }
    }

    started
}
