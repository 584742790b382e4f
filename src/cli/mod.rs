//! CLI command implementations
//!
//! This module contains the implementation of all CLI subcommands.

pub mod prompt;
pub mod update;
pub mod vpn;

use outlinetv_core::{
    config::toml_config,
    error::AppError,
    prefs::{TomlPreferenceStore, VpnPreferences},
};
use std::sync::Arc;

/// Open the on-disk preference store
pub fn open_preferences() -> Result<VpnPreferences, AppError> {
    let store = TomlPreferenceStore::open(toml_config::preferences_path()?)?;
    Ok(VpnPreferences::new(Arc::new(store)))
}
