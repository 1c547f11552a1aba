//! Configuration file resolution and TOML loading
//!
//! Config file resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`<config_dir>/uxc/<file_name>`)
//! 4. None - caller falls back to compiled defaults

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fmt;
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "UXC_CONFIG";

/// Where a resolved configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// `--config` command-line argument
    CommandLine(PathBuf),
    /// Environment variable
    Environment(PathBuf),
    /// Per-user config file found in the platform config directory
    UserConfig(PathBuf),
    /// No file found, compiled defaults apply
    Defaults,
}

impl ConfigSource {
    /// Path of the config file, if one was resolved
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::UserConfig(p) => Some(p.as_path()),
            ConfigSource::Defaults => None,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::CommandLine(p) => write!(f, "{} (command line)", p.display()),
            ConfigSource::Environment(p) => write!(f, "{} (environment)", p.display()),
            ConfigSource::UserConfig(p) => write!(f, "{} (user config)", p.display()),
            ConfigSource::Defaults => f.write_str("built-in defaults"),
        }
    }
}

/// Logging configuration section shared by all binaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve the configuration file location
///
/// An explicitly named file (CLI or environment) must exist; a missing
/// per-user file silently falls through to defaults.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Result<ConfigSource> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(ConfigSource::CommandLine(path.to_path_buf()));
    }

    // Priority 2: Environment variable
    if let Ok(value) = std::env::var(env_var_name) {
        if !value.trim().is_empty() {
            let path = PathBuf::from(value);
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file named by {} not found: {}",
                    env_var_name,
                    path.display()
                )));
            }
            return Ok(ConfigSource::Environment(path));
        }
    }

    // Priority 3: Per-user config file
    if let Some(path) = user_config_path(file_name) {
        if path.exists() {
            return Ok(ConfigSource::UserConfig(path));
        }
        debug!("No user config at {}", path.display());
    }

    // Priority 4: compiled defaults
    Ok(ConfigSource::Defaults)
}

/// Per-user config file path for the platform
pub fn user_config_path(file_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("uxc").join(file_name))
}

/// Parse a TOML document into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(toml::from_str(content)?)
}

/// Load `T` from the resolved source, using `T::default()` when no file was found
///
/// Runs before logging is initialized; callers report `source` once their
/// subscriber is installed.
pub fn load_toml_config<T>(source: &ConfigSource) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match source.path() {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Read {} failed: {}", path.display(), e))
            })?;
            parse_toml(&content)
        }
        None => Ok(T::default()),
    }
}
