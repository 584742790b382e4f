//! Error types for the outlinetv VPN client
//!
//! This module defines all error types used throughout the application,
//! providing consistent error handling and user-friendly error messages.

use thiserror::Error;

/// Main error type for the outlinetv application
#[derive(Error, Debug)]
pub enum AppError {
    /// Errors related to configuration loading/parsing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors related to the preference store
    #[error("Preference error: {0}")]
    Preference(#[from] PreferenceError),

    /// Errors related to VPN session operations
    #[error("VPN error: {0}")]
    Vpn(#[from] VpnError),

    /// Failures that moved the session into the error state
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Errors related to the VPN permission prompt
    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    /// Errors related to the update pipeline
    #[error("Update error: {0}")]
    Update(#[from] UpdateError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to save configuration file: {path}")]
    SaveFailed { path: String },

    #[error("Invalid URL for {field}: {url}")]
    InvalidUrl { field: String, url: String },

    #[error("Configuration validation error: {message}")]
    ValidationError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// Preference store errors
#[derive(Error, Debug)]
pub enum PreferenceError {
    #[error("Failed to read preferences from {path}: {message}")]
    ReadFailed { path: String, message: String },

    #[error("Failed to write preferences to {path}: {message}")]
    WriteFailed { path: String, message: String },
}

/// VPN session operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VpnError {
    #[error("Cannot {operation} while {from}")]
    InvalidStateTransition {
        from: crate::vpn::VpnConnectionState,
        operation: &'static str,
    },

    #[error("Invalid access key: {reason}")]
    InvalidAccessKey { reason: String },

    #[error("Failed to start tunnel: {reason}")]
    TunnelStartFailed { reason: String },

    #[error("Failed to resolve dynamic access key: {reason}")]
    KeyResolutionFailed { reason: String },

    #[error("Session runtime is no longer running")]
    SessionClosed,
}

/// VPN permission request errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("A permission request is already in flight")]
    RequestAlreadyInFlight,

    #[error("No pending permission request matches token {token}")]
    UnknownRequest { token: u64 },

    #[error("Failed to launch permission prompt: {reason}")]
    LaunchFailed { reason: String },
}

/// Failures surfaced to the presentation layer alongside the `Error` state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("VPN permission was denied")]
    PermissionDenied,

    #[error("VPN permission request failed: {0}")]
    PermissionRequestFailed(String),

    #[error("Tunnel reported an error")]
    TunnelSignalError,

    #[error("Tunnel failed to start: {0}")]
    TunnelStartFailed(String),
}

/// Update pipeline errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("Update check failed: {0}")]
    CheckFailed(String),

    #[error("Release {version} has no artifact matching '{suffix}'")]
    NoArtifact { version: String, suffix: String },

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("A download is already in progress")]
    DownloadInFlight,

    #[error("No update is available to download")]
    NotAvailable,

    #[error("Download cancelled")]
    Cancelled,

    #[error("Installer failed: {0}")]
    InstallFailed(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
