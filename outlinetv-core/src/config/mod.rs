//! Configuration module
//!
//! Application settings for the tunnel client and the self-updater, loaded
//! from `config.toml` in the user's configuration directory.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

pub mod toml_config;

pub use toml_config::{
    get_config_dir, get_config_path, load_config, load_config_from_path, preferences_path,
    save_config_to_path,
};

/// Default endpoint for the latest published release
pub const DEFAULT_RELEASES_URL: &str =
    "https://api.github.com/repos/outlinetv/outlinetv/releases/latest";

/// Default asset suffix picked from a release
pub const DEFAULT_ARTIFACT_SUFFIX: &str = ".AppImage";

/// Default tunnel client binary
pub const DEFAULT_TUNNEL_COMMAND: &str = "outline-go-tun2socks";

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Self-update settings
    #[serde(default)]
    pub update: UpdateConfig,

    /// External tunnel client
    #[serde(default)]
    pub tunnel: TunnelCommandConfig,
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.update.validate()?;
        self.tunnel.validate()
    }
}

/// `[update]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// GitHub-style "latest release" API endpoint
    pub releases_url: String,

    /// File name suffix of the asset to install
    pub artifact_suffix: String,

    /// Where downloaded artifacts are stored
    pub download_dir: PathBuf,

    /// Installer program; the artifact is executed directly when unset
    pub install_command: Option<String>,

    /// Arguments passed before the artifact path
    pub install_args: Vec<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl UpdateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url("update.releases_url", &self.releases_url)?;

        if self.artifact_suffix.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "update.artifact_suffix cannot be empty".to_string(),
            });
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "update.request_timeout_secs cannot be zero".to_string(),
            });
        }

        if matches!(&self.install_command, Some(command) if command.trim().is_empty()) {
            return Err(ConfigError::ValidationError {
                message: "update.install_command cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            releases_url: DEFAULT_RELEASES_URL.to_string(),
            artifact_suffix: DEFAULT_ARTIFACT_SUFFIX.to_string(),
            download_dir: std::env::temp_dir().join("outlinetv-updates"),
            install_command: None,
            install_args: Vec::new(),
            request_timeout_secs: 30,
        }
    }
}

/// `[tunnel]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelCommandConfig {
    /// Tunnel client program
    pub command: String,

    /// Arguments passed before the access key
    pub args: Vec<String>,

    /// Timeout for fetching the configuration behind an `ssconf://` key
    pub resolve_timeout_secs: u64,
}

impl TunnelCommandConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "tunnel.command cannot be empty".to_string(),
            });
        }
        if self.resolve_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "tunnel.resolve_timeout_secs must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for TunnelCommandConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_TUNNEL_COMMAND.to_string(),
            args: vec!["-transport".to_string()],
            resolve_timeout_secs: 30,
        }
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidUrl {
        field: field.to_string(),
        url: value.to_string(),
    };

    let url = Url::parse(value).map_err(|_| invalid())?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_config_validation() {
        let mut bad_url = AppConfig::default();
        bad_url.update.releases_url = "ftp://example.com/latest".to_string();

        let mut empty_url = AppConfig::default();
        empty_url.update.releases_url = String::new();

        let mut zero_timeout = AppConfig::default();
        zero_timeout.update.request_timeout_secs = 0;

        let mut empty_command = AppConfig::default();
        empty_command.tunnel.command = "  ".to_string();

        let mut empty_installer = AppConfig::default();
        empty_installer.update.install_command = Some(String::new());

        let mut zero_resolve_timeout = AppConfig::default();
        zero_resolve_timeout.tunnel.resolve_timeout_secs = 0;

        for config in [
            bad_url,
            empty_url,
            zero_timeout,
            empty_command,
            empty_installer,
            zero_resolve_timeout,
        ] {
            assert!(config.validate().is_err(), "{:?} should be rejected", config);
        }
    }

    #[test]
    fn test_invalid_url_names_the_field() {
        let mut config = AppConfig::default();
        config.update.releases_url = "not a url".to_string();

        match config.validate() {
            Err(ConfigError::InvalidUrl { field, .. }) => assert_eq!(field, "update.releases_url"),
            other => panic!("expected InvalidUrl, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [tunnel]
            command = "/usr/bin/sslocal"
            "#,
        )
        .unwrap();

        assert_eq!(config.tunnel.command, "/usr/bin/sslocal");
        assert_eq!(config.tunnel.args, vec!["-transport".to_string()]);
        assert_eq!(config.tunnel.resolve_timeout_secs, 30);
        assert_eq!(config.update, UpdateConfig::default());
    }
}
