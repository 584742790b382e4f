//! Main screen lifecycle
//!
//! A [`MainScreen`] is the short-lived presentation host around the
//! long-lived session. It owns everything that must not outlive it: the
//! broadcast bridge registration, the task waiting on a permission prompt
//! and any running update download. Dropping the screen detaches all of
//! them; the session itself keeps running.

use crate::error::{AppError, UpdateError, VpnError};
use crate::permission::{PendingPermission, RequestToken};
use crate::session::{SessionHandle, SessionSnapshot};
use crate::update::{UpdatePipeline, UpdateState};
use crate::vpn::{BridgeRegistration, SignalHub};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct MainScreen {
    session: SessionHandle,
    updates: Option<Arc<UpdatePipeline>>,
    current_version: String,
    bridge: Option<BridgeRegistration>,
    permission_waiter: Option<JoinHandle<()>>,
    download_cancel: CancellationToken,
}

impl MainScreen {
    /// Attach a screen to a running session
    ///
    /// Registers for tunnel lifecycle signals and, if a connect was waiting
    /// on permission when the previous screen went away, resumes waiting
    /// for that answer.
    pub async fn create(
        hub: &SignalHub,
        session: SessionHandle,
        updates: Option<Arc<UpdatePipeline>>,
        current_version: impl Into<String>,
    ) -> Self {
        let bridge = session.bridge(hub);
        let mut screen = Self {
            session,
            updates,
            current_version: current_version.into(),
            bridge: Some(bridge),
            permission_waiter: None,
            download_cancel: CancellationToken::new(),
        };

        if let Some(pending) = screen.session.reattach_permission().await {
            debug!(token = %pending.token(), "Reattached to pending permission request");
            screen.await_permission(pending);
        }

        screen
    }

    /// Refresh state when the screen becomes visible again
    ///
    /// Returns whether an update is on offer.
    pub async fn resume(&self) -> bool {
        self.session.check_vpn_connection_state();
        self.session.load_last_vpn_server();

        match &self.updates {
            Some(updates) => updates.check_for_update(&self.current_version).await,
            None => false,
        }
    }

    /// Start connecting to `access_key`
    pub async fn connect(&mut self, access_key: &str) -> Result<RequestToken, AppError> {
        let pending = self.session.connect(access_key).await?;
        let token = pending.token();
        self.await_permission(pending);
        Ok(token)
    }

    pub async fn disconnect(&self) -> Result<(), VpnError> {
        self.session.disconnect().await
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.subscribe()
    }

    pub fn update_states(&self) -> Option<watch::Receiver<UpdateState>> {
        self.updates.as_ref().map(|updates| updates.subscribe())
    }

    /// Download and install the offered update in the background
    ///
    /// The download is cancelled if the screen goes away first.
    pub fn start_update<F>(&self, on_progress: F) -> Option<JoinHandle<Result<PathBuf, UpdateError>>>
    where
        F: FnMut(u8) + Send + 'static,
    {
        let updates = self.updates.clone()?;
        let cancel = self.download_cancel.child_token();
        Some(tokio::spawn(async move {
            updates.download_and_install(on_progress, cancel).await
        }))
    }

    /// Hide the update offer
    pub fn dismiss_update(&self) {
        if let Some(updates) = &self.updates {
            updates.dismiss();
        }
    }

    /// Tear the screen down
    pub fn destroy(mut self) {
        self.detach();
    }

    fn await_permission(&mut self, pending: PendingPermission) {
        if let Some(previous) = self.permission_waiter.take() {
            previous.abort();
        }

        let session = self.session.clone();
        self.permission_waiter = Some(tokio::spawn(async move {
            let token = pending.token();
            match pending.outcome().await {
                Some(outcome) => session.permission_resolved(token, outcome),
                None => debug!(%token, "Permission outcome delivered elsewhere"),
            }
        }));
    }

    fn detach(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.unregister();
        }
        if let Some(waiter) = self.permission_waiter.take() {
            waiter.abort();
        }
        self.download_cancel.cancel();
    }
}

impl Drop for MainScreen {
    fn drop(&mut self) {
        self.detach();
    }
}
