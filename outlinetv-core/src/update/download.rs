//! Streaming artifact download
//!
//! The artifact is written to `<name>.part` and only renamed into place once
//! the whole body has arrived. Any failure or cancellation removes the
//! partial file.

use crate::error::UpdateError;
use crate::update::release::ReleaseInfo;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Suffix of the in-progress download file
pub const PARTIAL_SUFFIX: &str = ".part";

/// Downloads release artifacts into a directory
#[derive(Debug, Clone)]
pub struct ArtifactDownloader {
    client: Client,
    download_dir: PathBuf,
}

impl ArtifactDownloader {
    pub fn new(client: Client, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            download_dir: download_dir.into(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Download `release` and return the path of the finished artifact
    ///
    /// Whole-percent progress is offered on `progress` without waiting; values
    /// are dropped when the receiver falls behind.
    pub async fn download(
        &self,
        release: &ReleaseInfo,
        progress: mpsc::Sender<u8>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, UpdateError> {
        fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| UpdateError::Io(format!("Failed to create download directory: {}", e)))?;

        let final_path = self.download_dir.join(&release.artifact_name);
        let part_path = self
            .download_dir
            .join(format!("{}{}", release.artifact_name, PARTIAL_SUFFIX));

        info!(url = %release.download_url, path = %final_path.display(), "Downloading update");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            response = self.client.get(&release.download_url).send() => {
                response.map_err(|e| UpdateError::DownloadFailed(format!("Request failed: {}", e)))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::DownloadFailed(format!("HTTP {}", status)));
        }

        let total = response
            .content_length()
            .or((release.size > 0).then_some(release.size));

        let mut file = File::create(&part_path)
            .await
            .map_err(|e| UpdateError::Io(format!("Failed to create {}: {}", part_path.display(), e)))?;

        let written = stream_to_file(response, &mut file, total, &progress, cancel).await;
        drop(file);

        if let Err(e) = written {
            if let Err(remove_err) = fs::remove_file(&part_path).await {
                warn!(path = %part_path.display(), error = %remove_err, "Failed to remove partial download");
            }
            return Err(e);
        }

        fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| UpdateError::Io(format!("Failed to move artifact into place: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o755);
            if let Err(e) = fs::set_permissions(&final_path, perms).await {
                warn!(error = %e, "Failed to mark artifact executable");
            }
        }

        info!(path = %final_path.display(), "Download complete");
        Ok(final_path)
    }
}

async fn stream_to_file(
    response: Response,
    file: &mut File,
    total: Option<u64>,
    progress: &mpsc::Sender<u8>,
    cancel: &CancellationToken,
) -> Result<(), UpdateError> {
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    let mut last_percent = 0u8;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(downloaded, "Download cancelled");
                return Err(UpdateError::Cancelled);
            }
            chunk = stream.next() => chunk,
        };

        let bytes = match chunk {
            None => break,
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                return Err(UpdateError::DownloadFailed(format!("Stream interrupted: {}", e)));
            }
        };

        file.write_all(&bytes)
            .await
            .map_err(|e| UpdateError::Io(format!("Failed to write artifact: {}", e)))?;
        downloaded += bytes.len() as u64;

        if let Some(total) = total.filter(|t| *t > 0) {
            let percent = (downloaded.saturating_mul(100) / total).min(100) as u8;
            if percent > last_percent {
                last_percent = percent;
                // Coalesce: the consumer only needs the latest value.
                let _ = progress.try_send(percent);
            }
        }
    }

    if let Some(total) = total {
        if downloaded < total {
            return Err(UpdateError::DownloadFailed(format!(
                "Connection closed after {} of {} bytes",
                downloaded, total
            )));
        }
    }

    file.flush()
        .await
        .map_err(|e| UpdateError::Io(format!("Failed to flush artifact: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn release_for(server: &MockServer, name: &str) -> ReleaseInfo {
        ReleaseInfo {
            version: "1.3.0".to_string(),
            artifact_name: name.to_string(),
            download_url: format!("{}/download/{}", server.uri(), name),
            size: 0,
        }
    }

    #[tokio::test]
    async fn test_download_writes_artifact_and_reports_full_progress() {
        let server = MockServer::start().await;
        let body = vec![7u8; 64 * 1024];
        Mock::given(method("GET"))
            .and(path("/download/app.AppImage"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let downloader = ArtifactDownloader::new(Client::new(), dir.path());
        let (tx, mut rx) = mpsc::channel(128);

        let path = downloader
            .download(&release_for(&server, "app.AppImage"), tx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), body);
        assert!(!dir.path().join("app.AppImage.part").exists());

        let mut seen = Vec::new();
        while let Ok(p) = rx.try_recv() {
            seen.push(p);
        }
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_http_error_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let downloader = ArtifactDownloader::new(Client::new(), dir.path());
        let (tx, _rx) = mpsc::channel(8);

        let result = downloader
            .download(&release_for(&server, "app.AppImage"), tx, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(UpdateError::DownloadFailed(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_download_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8; 1024])
                    .set_delay(std::time::Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let downloader = ArtifactDownloader::new(Client::new(), dir.path());
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = downloader
            .download(&release_for(&server, "app.AppImage"), tx, &cancel)
            .await;

        assert_eq!(result, Err(UpdateError::Cancelled));
        assert!(!dir.path().join("app.AppImage").exists());
        assert!(!dir.path().join("app.AppImage.part").exists());
    }
}
