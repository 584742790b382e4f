//! Self-update pipeline
//!
//! Checks the release endpoint for a newer version, downloads the artifact
//! on a background task while reporting progress, then hands the file to an
//! [`Installer`]. The current [`UpdateState`] is published on a watch
//! channel for the presentation layer.

pub mod download;
pub mod installer;
pub mod release;

pub use download::ArtifactDownloader;
pub use installer::{CommandInstaller, Installer};
pub use release::{is_newer_version, ReleaseClient, ReleaseInfo};

use crate::config::UpdateConfig;
use crate::error::UpdateError;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PROGRESS_BUFFER: usize = 16;

/// Where the pipeline currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateStage {
    #[default]
    Idle,
    Checking,
    Available,
    Downloading,
    ReadyToInstall,
    Failed,
}

/// Observable update state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateState {
    pub current_version: String,
    pub latest_version: Option<String>,
    /// Whole percent, 0..=100
    pub download_progress: u8,
    pub stage: UpdateStage,
    pub last_error: Option<UpdateError>,
}

impl UpdateState {
    /// Whether the update offer should be shown
    pub fn offer_visible(&self) -> bool {
        matches!(
            self.stage,
            UpdateStage::Available | UpdateStage::Downloading | UpdateStage::ReadyToInstall
        )
    }
}

/// Check, download and install pipeline
pub struct UpdatePipeline {
    releases: ReleaseClient,
    downloader: ArtifactDownloader,
    installer: Arc<dyn Installer>,
    release: Mutex<Option<ReleaseInfo>>,
    state_tx: watch::Sender<UpdateState>,
}

impl UpdatePipeline {
    pub fn new(
        current_version: impl Into<String>,
        releases: ReleaseClient,
        downloader: ArtifactDownloader,
        installer: Arc<dyn Installer>,
    ) -> Self {
        let (state_tx, _) = watch::channel(UpdateState {
            current_version: current_version.into(),
            ..UpdateState::default()
        });

        Self {
            releases,
            downloader,
            installer,
            release: Mutex::new(None),
            state_tx,
        }
    }

    /// Build a pipeline from the `[update]` configuration section
    pub fn from_config(
        current_version: impl Into<String>,
        config: &UpdateConfig,
    ) -> Result<Self, UpdateError> {
        let releases = ReleaseClient::new(
            config.releases_url.clone(),
            config.artifact_suffix.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        let downloader =
            ArtifactDownloader::new(releases.http_client().clone(), config.download_dir.clone());
        let installer = CommandInstaller::new(
            config.install_command.clone(),
            config.install_args.clone(),
        );

        Ok(Self::new(
            current_version,
            releases,
            downloader,
            Arc::new(installer),
        ))
    }

    pub fn state(&self) -> UpdateState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.state_tx.subscribe()
    }

    /// Ask the release endpoint whether a version newer than
    /// `current_version` exists
    ///
    /// Failures are logged and leave the pipeline in `Failed`; they are
    /// never surfaced to the caller. While a download is running this is a
    /// no-op that reports the update as available. Dropping the returned
    /// future before it completes puts the pipeline back to `Idle`.
    pub async fn check_for_update(&self, current_version: &str) -> bool {
        let mut busy = None;
        self.state_tx.send_if_modified(|state| match state.stage {
            UpdateStage::Downloading | UpdateStage::Checking => {
                busy = Some(state.stage);
                false
            }
            _ => {
                state.current_version = current_version.to_string();
                state.stage = UpdateStage::Checking;
                state.last_error = None;
                true
            }
        });

        if let Some(stage) = busy {
            debug!(?stage, "Update check skipped");
            return stage == UpdateStage::Downloading;
        }

        let releases = self.releases.clone();
        let fetch = tokio::spawn(async move { releases.latest_release().await });
        let guard = CheckGuard::new(&self.state_tx, fetch.abort_handle());
        let fetched = fetch
            .await
            .unwrap_or_else(|e| Err(UpdateError::CheckFailed(format!("check task failed: {}", e))));
        guard.disarm();

        match fetched {
            Ok(release) => {
                let newer = is_newer_version(&release.version, current_version);
                let latest = release.version.clone();
                *self.release.lock().unwrap_or_else(PoisonError::into_inner) =
                    newer.then_some(release);

                if newer {
                    info!(current = %current_version, latest = %latest, "Update available");
                } else {
                    debug!(current = %current_version, latest = %latest, "Already up to date");
                }

                self.state_tx.send_modify(|state| {
                    state.latest_version = Some(latest);
                    state.download_progress = 0;
                    state.stage = if newer {
                        UpdateStage::Available
                    } else {
                        UpdateStage::Idle
                    };
                });
                newer
            }
            Err(e) => {
                warn!(error = %e, "Update check failed");
                self.state_tx.send_modify(|state| {
                    state.stage = UpdateStage::Failed;
                    state.last_error = Some(e);
                });
                false
            }
        }
    }

    /// Download the available update and hand it to the installer
    ///
    /// `on_progress` sees strictly increasing percentages ending with 100
    /// before the pipeline reaches `ReadyToInstall`. It is not called again
    /// once `cancel` fires; the partial download is then discarded and the
    /// pipeline ends in `Failed` with [`UpdateError::Cancelled`]. Dropping
    /// the returned future mid-download has the same effect as cancelling.
    pub async fn download_and_install<F>(
        &self,
        mut on_progress: F,
        cancel: CancellationToken,
    ) -> Result<PathBuf, UpdateError>
    where
        F: FnMut(u8),
    {
        let mut rejected = None;
        self.state_tx.send_if_modified(|state| match state.stage {
            UpdateStage::Available => {
                state.stage = UpdateStage::Downloading;
                state.download_progress = 0;
                state.last_error = None;
                true
            }
            UpdateStage::Downloading => {
                rejected = Some(UpdateError::DownloadInFlight);
                false
            }
            _ => {
                rejected = Some(UpdateError::NotAvailable);
                false
            }
        });
        if let Some(e) = rejected {
            return Err(e);
        }

        let release = self
            .release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(release) = release else {
            self.fail(UpdateError::NotAvailable);
            return Err(UpdateError::NotAvailable);
        };

        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_BUFFER);
        let downloader = self.downloader.clone();
        let worker_cancel = cancel.child_token();
        let guard = DownloadGuard::new(&self.state_tx, worker_cancel.clone());
        let worker = tokio::spawn(async move {
            downloader
                .download(&release, progress_tx, &worker_cancel)
                .await
        });

        let mut reported = 0u8;
        while let Some(percent) = progress_rx.recv().await {
            if cancel.is_cancelled() {
                continue;
            }
            if percent > reported {
                reported = percent;
                self.state_tx
                    .send_modify(|state| state.download_progress = percent);
                on_progress(percent);
            }
        }

        let downloaded = worker.await.unwrap_or_else(|e| {
            Err(UpdateError::DownloadFailed(format!(
                "download task failed: {}",
                e
            )))
        });
        guard.disarm();

        let artifact = match downloaded {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Update download failed");
                self.fail(e.clone());
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            if let Err(e) = tokio::fs::remove_file(&artifact).await {
                warn!(error = %e, "Failed to discard cancelled download");
            }
            self.fail(UpdateError::Cancelled);
            return Err(UpdateError::Cancelled);
        }

        if reported < 100 {
            on_progress(100);
        }
        self.state_tx.send_modify(|state| {
            state.download_progress = 100;
            state.stage = UpdateStage::ReadyToInstall;
        });

        if let Err(e) = self.installer.install(&artifact) {
            warn!(error = %e, "Failed to hand artifact to installer");
            self.fail(e.clone());
            return Err(e);
        }

        Ok(artifact)
    }

    /// Hide the update offer without downloading
    pub fn dismiss(&self) {
        self.state_tx.send_if_modified(|state| {
            if state.stage == UpdateStage::Available {
                state.stage = UpdateStage::Idle;
                true
            } else {
                false
            }
        });
    }

    fn fail(&self, error: UpdateError) {
        mark_failed(&self.state_tx, error);
    }
}

fn mark_failed(state_tx: &watch::Sender<UpdateState>, error: UpdateError) {
    state_tx.send_modify(|state| {
        state.stage = UpdateStage::Failed;
        state.last_error = Some(error);
    });
}

/// Puts an abandoned check back to `Idle` and stops its fetch
struct CheckGuard<'a> {
    state_tx: &'a watch::Sender<UpdateState>,
    fetch: AbortHandle,
    armed: bool,
}

impl<'a> CheckGuard<'a> {
    fn new(state_tx: &'a watch::Sender<UpdateState>, fetch: AbortHandle) -> Self {
        Self {
            state_tx,
            fetch,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.fetch.abort();
        let reset = self.state_tx.send_if_modified(|state| {
            if state.stage == UpdateStage::Checking {
                state.stage = UpdateStage::Idle;
                true
            } else {
                false
            }
        });
        if reset {
            debug!("Update check abandoned");
        }
    }
}

/// Stops the worker of an abandoned download and marks it cancelled
///
/// The worker removes its partial file when it observes the cancellation.
struct DownloadGuard<'a> {
    state_tx: &'a watch::Sender<UpdateState>,
    worker_cancel: CancellationToken,
    armed: bool,
}

impl<'a> DownloadGuard<'a> {
    fn new(state_tx: &'a watch::Sender<UpdateState>, worker_cancel: CancellationToken) -> Self {
        Self {
            state_tx,
            worker_cancel,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DownloadGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.worker_cancel.cancel();
        warn!("Update download abandoned");
        mark_failed(self.state_tx, UpdateError::Cancelled);
    }
}
