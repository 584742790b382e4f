//! Type definitions and wrappers for secure data handling
//!
//! Outline access keys embed the shadowsocks password, so they are kept in
//! `secrecy` wrappers to prevent accidental exposure in logs or debug output.

use secrecy::{ExposeSecret, Secret};
use url::Url;

use crate::error::VpnError;

/// URL scheme of a static Outline access key
pub const ACCESS_KEY_SCHEME: &str = "ss";

/// URL scheme of a dynamic access key, resolved over https at connect time
pub const DYNAMIC_KEY_SCHEME: &str = "ssconf";

/// Wrapper for an Outline access key (`ss://...` or `ssconf://...`)
///
/// The key is validated on construction and is never printed by `Debug`.
#[derive(Clone, Debug)]
pub struct AccessKey(Secret<String>);

impl AccessKey {
    /// Parse and validate an access key
    ///
    /// # Errors
    ///
    /// Returns `VpnError::InvalidAccessKey` if the key is not an `ss://` or
    /// `ssconf://` URL with a host. Dynamic keys are not fetched here.
    pub fn parse(key: &str) -> Result<Self, VpnError> {
        let url = parse_key_url(key)?;
        if url.host_str().is_none() {
            return Err(VpnError::InvalidAccessKey {
                reason: "access key has no server host".to_string(),
            });
        }
        Ok(Self(Secret::new(key.trim().to_string())))
    }

    /// Expose the key value (use with caution!)
    ///
    /// This should only be called when handing the key to the tunnel
    /// process or writing it to the preference store.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether the key points at a server configuration document
    pub fn is_dynamic(&self) -> bool {
        parse_key_url(self.expose()).is_ok_and(|url| url.scheme() == DYNAMIC_KEY_SCHEME)
    }

    /// https location of a dynamic key's configuration, without fragment
    pub fn config_url(&self) -> Option<String> {
        let mut url = parse_key_url(self.expose()).ok()?;
        if url.scheme() != DYNAMIC_KEY_SCHEME {
            return None;
        }
        url.set_fragment(None);
        let location = url.as_str().strip_prefix(DYNAMIC_KEY_SCHEME)?;
        Some(format!("https{}", location))
    }

    /// Human readable server name derived from the key
    ///
    /// Uses the percent-decoded URL fragment (`#My Server`), falling back to
    /// the server host.
    pub fn display_name(&self) -> String {
        let Ok(url) = parse_key_url(self.expose()) else {
            return String::new();
        };

        if let Some(fragment) = url.fragment().filter(|f| !f.is_empty()) {
            return urlencoding::decode(fragment)
                .map(|name| name.into_owned())
                .unwrap_or_else(|_| fragment.to_string());
        }

        url.host_str().unwrap_or_default().to_string()
    }
}

impl PartialEq for AccessKey {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for AccessKey {}

fn parse_key_url(key: &str) -> Result<Url, VpnError> {
    let url = Url::parse(key.trim()).map_err(|e| VpnError::InvalidAccessKey {
        reason: format!("failed to parse access key: {}", e),
    })?;

    if url.scheme() != ACCESS_KEY_SCHEME && url.scheme() != DYNAMIC_KEY_SCHEME {
        return Err(VpnError::InvalidAccessKey {
            reason: format!(
                "access key scheme must be {}:// or {}://, got: {}",
                ACCESS_KEY_SCHEME,
                DYNAMIC_KEY_SCHEME,
                url.scheme()
            ),
        });
    }

    Ok(url)
}

/// The last-configured VPN server
///
/// Persisted so it can be restored after a process restart. A descriptor is
/// always saved as a whole; it is never partially updated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VpnServerDescriptor {
    /// Access key used to reach the server
    pub key: AccessKey,
    /// Display name shown to the user
    pub name: String,
}

impl VpnServerDescriptor {
    /// Create a descriptor with an explicit display name
    pub fn new(key: AccessKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
        }
    }

    /// Create a descriptor named after the key itself
    pub fn from_key(key: AccessKey) -> Self {
        let name = key.display_name();
        Self { key, name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_key_accepts_ss_url() {
        let key = AccessKey::parse("ss://Y2hhY2hhMjA6cGFzcw@1.2.3.4:8388/?outline=1#Home").unwrap();
        assert_eq!(key.display_name(), "Home");
    }

    #[test]
    fn test_access_key_name_falls_back_to_host() {
        let key = AccessKey::parse("ss://Y2hhY2hhMjA6cGFzcw@vpn.example.com:443").unwrap();
        assert_eq!(key.display_name(), "vpn.example.com");
    }

    #[test]
    fn test_access_key_decodes_fragment() {
        let key = AccessKey::parse("ss://abc@1.2.3.4:443#My%20Server").unwrap();
        assert_eq!(key.display_name(), "My Server");
    }

    #[test]
    fn test_access_key_keeps_undecodable_fragment() {
        let key = AccessKey::parse("ss://abc@1.2.3.4:443#Caf%C3").unwrap();
        assert_eq!(key.display_name(), "Caf%C3");

        let key = AccessKey::parse("ss://abc@1.2.3.4:443#Caf%C3%A9%20%F0%9F%93%BA").unwrap();
        assert_eq!(key.display_name(), "Café 📺");
    }

    #[test]
    fn test_dynamic_key_points_at_https() {
        let key = AccessKey::parse("ssconf://keys.example.com/k/abc123#Lisbon").unwrap();
        assert!(key.is_dynamic());
        assert_eq!(
            key.config_url().as_deref(),
            Some("https://keys.example.com/k/abc123")
        );
        assert_eq!(key.display_name(), "Lisbon");
    }

    #[test]
    fn test_static_key_has_no_config_url() {
        let key = AccessKey::parse("ss://abc@1.2.3.4:443").unwrap();
        assert!(!key.is_dynamic());
        assert_eq!(key.config_url(), None);
    }

    #[test]
    fn test_access_key_rejects_other_schemes() {
        let result = AccessKey::parse("https://example.com");
        assert!(matches!(result, Err(VpnError::InvalidAccessKey { .. })));
    }

    #[test]
    fn test_access_key_rejects_garbage() {
        assert!(AccessKey::parse("not a key").is_err());
        assert!(AccessKey::parse("").is_err());
    }

    #[test]
    fn test_access_key_debug_is_redacted() {
        let key = AccessKey::parse("ss://supersecret@1.2.3.4:443").unwrap();
        assert!(!format!("{:?}", key).contains("supersecret"));
    }

    #[test]
    fn test_descriptor_from_key_uses_display_name() {
        let key = AccessKey::parse("ss://abc@1.2.3.4:443#Office").unwrap();
        let descriptor = VpnServerDescriptor::from_key(key);
        assert_eq!(descriptor.name, "Office");
    }
}
