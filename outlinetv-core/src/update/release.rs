//! Remote release metadata
//!
//! Queries a GitHub-style "latest release" endpoint for the published tag
//! and the download URL of the installable artifact.

use crate::error::UpdateError;
use reqwest::Client;
use serde::Deserialize;
use std::cmp::Ordering;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
}

/// Latest published release and its artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Version with any leading `v` removed
    pub version: String,
    /// File name of the artifact
    pub artifact_name: String,
    /// Where to download the artifact from
    pub download_url: String,
    /// Advertised size in bytes, 0 if unknown
    pub size: u64,
}

/// HTTP client for the release endpoint
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    client: Client,
    releases_url: String,
    artifact_suffix: String,
}

impl ReleaseClient {
    /// Create a release client
    ///
    /// # Arguments
    /// * `releases_url` - HTTP/HTTPS URL returning the latest release JSON
    /// * `artifact_suffix` - file name suffix selecting the asset to install
    /// * `timeout` - per-request timeout
    pub fn new(
        releases_url: String,
        artifact_suffix: String,
        timeout: Duration,
    ) -> Result<Self, UpdateError> {
        let url = Url::parse(&releases_url)
            .map_err(|e| UpdateError::CheckFailed(format!("Failed to parse URL: {}", e)))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(UpdateError::CheckFailed(format!(
                    "Only HTTP/HTTPS schemes are supported, got: {}",
                    scheme
                )));
            }
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("outlinetv/", env!("CARGO_PKG_VERSION")))
            .use_rustls_tls()
            .build()
            .map_err(|e| UpdateError::CheckFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            releases_url,
            artifact_suffix,
        })
    }

    /// Shared HTTP client, reused for artifact downloads
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    /// Fetch the latest release
    #[tracing::instrument(skip(self), fields(url = %self.releases_url))]
    pub async fn latest_release(&self) -> Result<ReleaseInfo, UpdateError> {
        let response = self
            .client
            .get(&self.releases_url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| UpdateError::CheckFailed(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::CheckFailed(format!(
                "Unexpected status code: {}",
                status
            )));
        }

        let release: GitHubRelease = response
            .json()
            .await
            .map_err(|e| UpdateError::CheckFailed(format!("Invalid release metadata: {}", e)))?;

        let version = normalize_version(&release.tag_name).to_string();
        debug!(tag = %release.tag_name, assets = release.assets.len(), "Fetched release metadata");

        let asset = release
            .assets
            .into_iter()
            .find(|asset| asset.name.ends_with(&self.artifact_suffix))
            .ok_or_else(|| UpdateError::NoArtifact {
                version: version.clone(),
                suffix: self.artifact_suffix.clone(),
            })?;

        info!(version = %version, artifact = %asset.name, "Latest release found");
        Ok(ReleaseInfo {
            version,
            artifact_name: asset.name,
            download_url: asset.browser_download_url,
            size: asset.size,
        })
    }
}

fn normalize_version(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix(['v', 'V']).unwrap_or(tag)
}

#[derive(Debug, PartialEq, Eq)]
struct Version<'a> {
    core: (u64, u64, u64),
    pre: Option<&'a str>,
}

impl<'a> Version<'a> {
    fn parse(input: &'a str) -> Option<Self> {
        let input = normalize_version(input);
        let input = input.split('+').next().unwrap_or(input);
        let (core, pre) = match input.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (input, None),
        };

        let mut parts = core.split('.');
        let mut next = || -> Option<u64> {
            match parts.next() {
                Some(part) => part.parse().ok(),
                None => Some(0),
            }
        };
        let parsed = (next()?, next()?, next()?);
        if parts.next().is_some() {
            return None;
        }

        Some(Self { core: parsed, pre })
    }
}

impl Ord for Version<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.core
            .cmp(&other.core)
            .then_with(|| match (self.pre, other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

impl PartialOrd for Version<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => l.cmp(r),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Whether `candidate` takes precedence over `current`
///
/// Versions that fail to parse never count as newer.
pub fn is_newer_version(candidate: &str, current: &str) -> bool {
    match (Version::parse(candidate), Version::parse(current)) {
        (Some(candidate), Some(current)) => candidate > current,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_version_wins() {
        assert!(is_newer_version("1.3.0", "1.2.0"));
        assert!(is_newer_version("v1.2.1", "1.2.0"));
        assert!(is_newer_version("2.0", "1.9.9"));
        assert!(is_newer_version("1.10.0", "1.9.0"));
    }

    #[test]
    fn test_same_or_older_is_not_newer() {
        assert!(!is_newer_version("1.2.0", "1.2.0"));
        assert!(!is_newer_version("1.1.0", "1.2.0"));
        assert!(!is_newer_version("v1.2", "1.2.0"));
    }

    #[test]
    fn test_prerelease_precedence() {
        assert!(is_newer_version("1.3.0", "1.3.0-beta.2"));
        assert!(!is_newer_version("1.3.0-beta.2", "1.3.0"));
        assert!(is_newer_version("1.3.0-beta.10", "1.3.0-beta.2"));
        assert!(is_newer_version("1.3.0-rc.1", "1.3.0-beta.9"));
        assert!(is_newer_version("1.3.0-beta", "1.2.9"));
    }

    #[test]
    fn test_build_metadata_is_ignored() {
        assert!(!is_newer_version("1.2.0+build.5", "1.2.0"));
    }

    #[test]
    fn test_garbage_is_never_newer() {
        assert!(!is_newer_version("latest", "1.2.0"));
        assert!(!is_newer_version("1.2.0.1", "1.2.0"));
        assert!(!is_newer_version("1.3.0", "nightly"));
    }

    #[test]
    fn test_release_client_rejects_bad_urls() {
        let timeout = Duration::from_secs(5);
        assert!(ReleaseClient::new("ftp://example.com".into(), ".apk".into(), timeout).is_err());
        assert!(ReleaseClient::new("not a url".into(), ".apk".into(), timeout).is_err());
        assert!(ReleaseClient::new(
            "https://api.github.com/repos/o/r/releases/latest".into(),
            ".apk".into(),
            timeout
        )
        .is_ok());
    }
}
