//! Config Loader
//!
//! Builds the layered configuration from disk.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use super::{Config, ConfigError};
use boxhead_runtime::ConfigSnapshot;

/// Name of the config file looked up in the user directory
pub const USER_CONFIG_FILE: &str = "config.toml";

/// What to load on top of the built-in defaults
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// A config file that must exist
    pub config_file: Option<PathBuf>,
    /// Replaces `paths.user_dir`
    pub user_dir: Option<PathBuf>,
    /// `@@`-separated `section.key=value` overrides
    pub overrides: String,
}

/// What the loader actually did
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Files merged, in order
    pub sources: Vec<PathBuf>,
    /// Overrides that were skipped
    pub rejected: Vec<ConfigError>,
}

/// The resolved configuration plus the report of how it was built
#[derive(Debug)]
pub struct Loaded {
    pub config: Config,
    pub report: LoadReport,
}

/// Config loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load defaults, the explicit config file, the user config and overrides
    pub async fn load(options: &LoadOptions) -> Result<Loaded, ConfigError> {
        let mut config = Config::defaults()?;
        let mut report = LoadReport::default();

        if let Some(path) = &options.config_file {
            if !fs::try_exists(path).await? {
                return Err(ConfigError::NotFound(path.clone()));
            }
            Self::merge_file(&mut config, path).await?;
            report.sources.push(path.clone());
        }

        // The user dir may come from the command line or from a config file
        // loaded above.
        let user_dir = match &options.user_dir {
            Some(dir) => {
                let dir = expand_home(dir);
                config.set_str(&["paths", "user_dir"], dir.to_string_lossy())?;
                dir
            }
            None => expand_home(Path::new(
                &config.get_str(&["paths", "user_dir"], "~/.config/boxhead"),
            )),
        };

        let user_file = user_dir.join(USER_CONFIG_FILE);
        if fs::try_exists(&user_file).await? {
            Self::merge_file(&mut config, &user_file).await?;
            report.sources.push(user_file);
        } else {
            debug!("No user config at {}", user_file.display());
        }

        if let Some(dir) = &options.user_dir {
            // The command line beats anything the user file says.
            config.set_str(&["paths", "user_dir"], expand_home(dir).to_string_lossy())?;
        }

        report.rejected = config.apply_overrides(&options.overrides);
        for rejected in &report.rejected {
            warn!("{}", rejected);
        }

        info!(
            "Loaded config from {} file(s), {} override(s) rejected",
            report.sources.len(),
            report.rejected.len()
        );

        Ok(Loaded { config, report })
    }

    async fn merge_file(config: &mut Config, path: &Path) -> Result<(), ConfigError> {
        let content = fs::read_to_string(path).await?;
        let layer = Config::parse(&content, path)?;
        config.merge(layer.as_table().clone());
        debug!("Merged config from {}", path.display());
        Ok(())
    }
}

/// Expand a leading `~` to `$HOME`
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}
