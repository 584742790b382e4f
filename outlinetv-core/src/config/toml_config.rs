//! TOML configuration file I/O
//!
//! Loads and saves [`AppConfig`] in the user's configuration directory.

use crate::config::AppConfig;
use crate::error::{AppError, ConfigError};
use crate::prefs::toml_store::PREFERENCES_FILE_NAME;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Get the configuration directory
///
/// Returns `$OUTLINETV_CONFIG_DIR` if set, otherwise `~/.config/outlinetv`.
pub fn get_config_dir() -> Result<PathBuf, AppError> {
    if let Ok(config_dir) = std::env::var("OUTLINETV_CONFIG_DIR") {
        return Ok(PathBuf::from(config_dir));
    }

    let home = std::env::var("HOME").map_err(|_| {
        AppError::Config(ConfigError::IoError {
            message: "HOME environment variable not set".to_string(),
        })
    })?;

    Ok(PathBuf::from(home).join(".config").join("outlinetv"))
}

/// Get the default configuration file path
pub fn get_config_path() -> Result<PathBuf, AppError> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Get the preference store file path
pub fn preferences_path() -> Result<PathBuf, AppError> {
    Ok(get_config_dir()?.join(PREFERENCES_FILE_NAME))
}

/// Load configuration from the default file
pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from_path(get_config_path()?)
}

/// Load configuration from a specific TOML file
///
/// A missing file yields the defaults.
pub fn load_config_from_path<P: AsRef<Path>>(path: P) -> Result<AppConfig, AppError> {
    let path = path.as_ref();
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(AppConfig::default());
        }
        Err(e) => {
            return Err(AppError::Config(ConfigError::IoError {
                message: format!("Failed to read config file: {}", e),
            }));
        }
    };

    let config: AppConfig = toml::from_str(&contents).map_err(|e| {
        AppError::Config(ConfigError::ValidationError {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    })?;

    config.validate()?;
    Ok(config)
}

/// Save configuration to a specific TOML file
pub fn save_config_to_path<P: AsRef<Path>>(config: &AppConfig, path: P) -> Result<(), AppError> {
    let path = path.as_ref();
    config.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::Config(ConfigError::IoError {
                message: format!("Failed to create config directory: {}", e),
            })
        })?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents).map_err(|_| {
        AppError::Config(ConfigError::SaveFailed {
            path: path.to_string_lossy().to_string(),
        })
    })?;

    info!("Saved configuration to {:?}", path);
    Ok(())
}
