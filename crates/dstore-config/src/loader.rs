//! Locating and reading the settings file

use crate::settings::ClientSettings;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable that overrides the settings file location
pub const CONFIG_ENV_VAR: &str = "DSTORE_CONFIG";

/// Errors from loading settings
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file exists but could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for [`ClientSettings`]
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },
}

/// Get the settings file path
///
/// Priority:
/// 1. `DSTORE_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/dstore/client.toml`
/// 3. `./.config/dstore/client.toml` when no config directory is known
pub fn settings_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("dstore")
        .join("client.toml")
}

/// Load settings from `path`
///
/// A missing or empty file yields the defaults; a malformed file is an error
/// rather than being silently ignored.
pub fn load_settings(path: &Path) -> Result<ClientSettings, ConfigError> {
    if !path.exists() {
        debug!("No settings file at {}, using defaults", path.display());
        return Ok(ClientSettings::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(ClientSettings::default());
    }

    let settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loaded settings from {}", path.display());
    Ok(settings)
}
