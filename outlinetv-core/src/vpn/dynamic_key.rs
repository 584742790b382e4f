//! Dynamic access keys
//!
//! An `ssconf://` key names an https document holding the current server
//! configuration, either as a plain `ss://` link or as a JSON object. The
//! document is fetched every time the tunnel starts, so the server may move
//! or rotate its password without handing out a new key.

use crate::error::VpnError;
use crate::types::{AccessKey, ACCESS_KEY_SCHEME};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Server configuration document
#[derive(Deserialize)]
struct ServerConfig {
    server: String,
    server_port: u16,
    password: String,
    method: String,
    /// Bytes sent before the first payload, some servers need it to
    /// disguise the connection
    #[serde(default)]
    prefix: Option<String>,
}

/// Refusal sent instead of a configuration
#[derive(Deserialize)]
struct ErrorDocument {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl ServerConfig {
    fn to_access_key(&self) -> Result<AccessKey, VpnError> {
        let user_info = URL_SAFE_NO_PAD.encode(format!("{}:{}", self.method, self.password));
        let host = if self.server.contains(':') && !self.server.starts_with('[') {
            format!("[{}]", self.server)
        } else {
            self.server.clone()
        };

        let mut key = format!(
            "{}://{}@{}:{}/?outline=1",
            ACCESS_KEY_SCHEME, user_info, host, self.server_port
        );
        if let Some(prefix) = self.prefix.as_deref().filter(|p| !p.is_empty()) {
            key.push_str("&prefix=");
            key.push_str(&urlencoding::encode(prefix));
        }

        AccessKey::parse(&key)
    }
}

/// Fetches the static key behind an `ssconf://` key
#[derive(Debug, Clone)]
pub struct DynamicKeyResolver {
    client: Client,
}

impl DynamicKeyResolver {
    pub fn new(timeout: Duration) -> Result<Self, VpnError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("outlinetv/", env!("CARGO_PKG_VERSION")))
            .use_rustls_tls()
            .build()
            .map_err(|e| VpnError::KeyResolutionFailed {
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    /// Static key to hand to the tunnel; static keys are returned unchanged
    pub async fn resolve(&self, key: &AccessKey) -> Result<AccessKey, VpnError> {
        match key.config_url() {
            Some(config_url) => self.fetch(&config_url).await,
            None => Ok(key.clone()),
        }
    }

    /// Download and decode a server configuration document
    #[tracing::instrument(skip_all)]
    pub async fn fetch(&self, config_url: &str) -> Result<AccessKey, VpnError> {
        let failed = |reason: String| VpnError::KeyResolutionFailed { reason };

        let response = self
            .client
            .get(config_url)
            .send()
            .await
            .map_err(|e| failed(format!("Request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("Unexpected status code: {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| failed(format!("Failed to read server configuration: {}", e.without_url())))?;
        let body = body.trim();

        if body.starts_with(&format!("{}://", ACCESS_KEY_SCHEME)) {
            debug!("Server configuration is a plain access key");
            return AccessKey::parse(body).map_err(|e| failed(e.to_string()));
        }

        if let Ok(refusal) = serde_json::from_str::<ErrorDocument>(body) {
            return Err(failed(format!("Server refused: {}", refusal.error.message)));
        }

        let config: ServerConfig = serde_json::from_str(body)
            .map_err(|e| failed(format!("Invalid server configuration: {}", e)))?;
        info!(server = %config.server, port = config.server_port, "Resolved dynamic access key");

        config.to_access_key().map_err(|e| failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONFIG_PATH: &str = "/keys/office";

    async fn serve(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(CONFIG_PATH))
            .respond_with(response)
            .mount(server)
            .await;
    }

    async fn fetch(server: &MockServer) -> Result<AccessKey, VpnError> {
        DynamicKeyResolver::new(Duration::from_secs(5))
            .unwrap()
            .fetch(&format!("{}{}", server.uri(), CONFIG_PATH))
            .await
    }

    #[tokio::test]
    async fn test_json_configuration_becomes_access_key() {
        let server = MockServer::start().await;
        serve(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({
                "server": "203.0.113.7",
                "server_port": 8388,
                "password": "secret",
                "method": "chacha20-ietf-poly1305"
            })),
        )
        .await;

        let key = fetch(&server).await.unwrap();
        assert_eq!(
            key.expose(),
            "ss://Y2hhY2hhMjAtaWV0Zi1wb2x5MTMwNTpzZWNyZXQ@203.0.113.7:8388/?outline=1"
        );
        assert!(!key.is_dynamic());
    }

    #[tokio::test]
    async fn test_prefix_and_ipv6_server() {
        let server = MockServer::start().await;
        serve(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({
                "server": "2001:db8::7",
                "server_port": 443,
                "password": "secret",
                "method": "chacha20-ietf-poly1305",
                "prefix": "POST "
            })),
        )
        .await;

        let key = fetch(&server).await.unwrap();
        assert!(key.expose().contains("@[2001:db8::7]:443/"));
        assert!(key.expose().ends_with("&prefix=POST%20"));
    }

    #[tokio::test]
    async fn test_plain_access_key_document() {
        let server = MockServer::start().await;
        serve(
            &server,
            ResponseTemplate::new(200).set_body_string("ss://abc@198.51.100.4:443#Moved\n"),
        )
        .await;

        let key = fetch(&server).await.unwrap();
        assert_eq!(key.expose(), "ss://abc@198.51.100.4:443#Moved");
    }

    #[tokio::test]
    async fn test_refusal_message_is_reported() {
        let server = MockServer::start().await;
        serve(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(json!({ "error": { "message": "key revoked" } })),
        )
        .await;

        let result = fetch(&server).await;
        assert!(
            matches!(&result, Err(VpnError::KeyResolutionFailed { reason }) if reason.contains("key revoked")),
            "Unexpected result: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_http_error_fails_resolution() {
        let server = MockServer::start().await;
        serve(&server, ResponseTemplate::new(404)).await;

        let result = fetch(&server).await;
        assert!(matches!(result, Err(VpnError::KeyResolutionFailed { .. })));
    }

    #[tokio::test]
    async fn test_malformed_document_fails_resolution() {
        let server = MockServer::start().await;
        serve(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({ "server": "203.0.113.7" })),
        )
        .await;

        let result = fetch(&server).await;
        assert!(matches!(result, Err(VpnError::KeyResolutionFailed { .. })));
    }

    #[tokio::test]
    async fn test_static_key_resolves_to_itself() {
        let key = AccessKey::parse("ss://abc@1.2.3.4:443#Office").unwrap();
        let resolver = DynamicKeyResolver::new(Duration::from_secs(5)).unwrap();
        assert_eq!(resolver.resolve(&key).await.unwrap(), key);
    }
}
