//! Typed access to the persisted VPN keys

use super::PreferenceStore;
use crate::error::PreferenceError;
use crate::types::{AccessKey, VpnServerDescriptor};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tracing::warn;

/// Key holding the last server access key
pub const KEY_VPN: &str = "vpn_key";
/// Key holding the last server display name
pub const KEY_SERVER_NAME: &str = "server_name";
/// Key holding the tunnel start time in epoch milliseconds
pub const KEY_VPN_START_TIME: &str = "vpn_start_time";

/// Typed facade over a [`PreferenceStore`]
#[derive(Clone)]
pub struct VpnPreferences {
    store: Arc<dyn PreferenceStore>,
}

impl VpnPreferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// Save the server descriptor, overwriting the previous one
    ///
    /// The key and the name are written together; a failed write leaves the
    /// previous pair in place.
    pub fn save_vpn_server(&self, server: &VpnServerDescriptor) -> Result<(), PreferenceError> {
        self.store.set_all(&[
            (KEY_VPN, server.key.expose()),
            (KEY_SERVER_NAME, &server.name),
        ])
    }

    /// Load the saved server descriptor
    ///
    /// Returns `None` unless both the key and the name are present and the
    /// key still parses.
    pub fn load_vpn_server(&self) -> Result<Option<VpnServerDescriptor>, PreferenceError> {
        let (Some(key), Some(name)) = (self.store.get(KEY_VPN)?, self.store.get(KEY_SERVER_NAME)?)
        else {
            return Ok(None);
        };

        match AccessKey::parse(&key) {
            Ok(key) => Ok(Some(VpnServerDescriptor::new(key, name))),
            Err(e) => {
                warn!("Ignoring saved server with invalid access key: {}", e);
                Ok(None)
            }
        }
    }

    /// Record when the tunnel was started
    pub fn save_start_time(&self, started_at: DateTime<Utc>) -> Result<(), PreferenceError> {
        self.store
            .set(KEY_VPN_START_TIME, &started_at.timestamp_millis().to_string())
    }

    /// When the tunnel was started; `None` means it is not running
    pub fn start_time(&self) -> Result<Option<DateTime<Utc>>, PreferenceError> {
        let Some(raw) = self.store.get(KEY_VPN_START_TIME)? else {
            return Ok(None);
        };

        let parsed = raw
            .parse::<i64>()
            .ok()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
        if parsed.is_none() {
            warn!("Ignoring unparsable tunnel start time: {}", raw);
        }
        Ok(parsed)
    }

    pub fn clear_start_time(&self) -> Result<(), PreferenceError> {
        self.store.remove(KEY_VPN_START_TIME)
    }

    pub fn clear_all(&self) -> Result<(), PreferenceError> {
        self.store.clear()
    }
}
