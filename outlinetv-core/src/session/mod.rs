//! VPN session coordination
//!
//! [`VpnSessionCoordinator`] owns the authoritative [`VpnConnectionState`].
//! It drives the permission -> tunnel start sequence, applies lifecycle
//! events from the broadcast bridge and publishes immutable
//! [`SessionSnapshot`]s for the presentation layer.
//!
//! The coordinator is not thread-safe by itself; [`SessionRuntime`] runs it
//! on a single task and feeds it commands and events one at a time.

pub mod runtime;

pub use runtime::{SessionHandle, SessionRuntime};

use crate::error::{AppError, SessionError, VpnError};
use crate::permission::{PendingPermission, PermissionGate, PermissionOutcome, RequestToken};
use crate::prefs::VpnPreferences;
use crate::types::{AccessKey, VpnServerDescriptor};
use crate::vpn::{Transition, TunnelManager, VpnConnectionState, VpnEvent};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Read-only view of the session published to observers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: VpnConnectionState,
    /// Last saved or connected server
    pub server: Option<VpnServerDescriptor>,
    /// When the tunnel came up, while connected
    pub connected_since: Option<DateTime<Utc>>,
    /// Why the session is in `Error`
    pub last_error: Option<SessionError>,
    /// A permission prompt is waiting for the user
    pub awaiting_permission: bool,
}

#[derive(Debug)]
struct PendingConnect {
    token: RequestToken,
    server: VpnServerDescriptor,
}

/// Coordinates the VPN session state machine
pub struct VpnSessionCoordinator {
    state: VpnConnectionState,
    tunnel: Arc<dyn TunnelManager>,
    gate: PermissionGate,
    prefs: VpnPreferences,
    pending: Option<PendingConnect>,
    server: Option<VpnServerDescriptor>,
    connecting_to: Option<VpnServerDescriptor>,
    connected_since: Option<DateTime<Utc>>,
    last_error: Option<SessionError>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl VpnSessionCoordinator {
    /// Create a coordinator reconciled against the live tunnel status
    ///
    /// The initial state is `Connected` if the tunnel is already running
    /// (for example after a process restart), `Disconnected` otherwise.
    pub fn new(tunnel: Arc<dyn TunnelManager>, gate: PermissionGate, prefs: VpnPreferences) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        let mut coordinator = Self {
            state: VpnConnectionState::Disconnected,
            tunnel,
            gate,
            prefs,
            pending: None,
            server: None,
            connecting_to: None,
            connected_since: None,
            last_error: None,
            snapshot_tx,
        };

        if let Err(e) = coordinator.load_last_vpn_server() {
            warn!("Failed to load saved server: {}", e);
        }
        coordinator.check_vpn_connection_state();
        coordinator
    }

    pub fn state(&self) -> VpnConnectionState {
        self.state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshots; the current one is immediately available
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Token of the permission request a connect is waiting on
    pub fn pending_request(&self) -> Option<RequestToken> {
        self.pending.as_ref().map(|p| p.token)
    }

    /// Connect and wait for the permission answer in place
    ///
    /// Convenience over [`begin_connect`](Self::begin_connect) and
    /// [`complete_connect`](Self::complete_connect) for callers that own
    /// the coordinator directly.
    pub async fn connect(&mut self, access_key: &str) -> Result<VpnConnectionState, AppError> {
        let pending = self.begin_connect(access_key)?;
        let token = pending.token();
        if let Some(outcome) = pending.outcome().await {
            self.complete_connect(token, outcome);
        }
        Ok(self.state)
    }

    /// Validate the access key and ask for VPN permission
    ///
    /// Nothing touches the tunnel until the permission resolves and is
    /// passed to [`complete_connect`](Self::complete_connect).
    ///
    /// # Errors
    ///
    /// * `VpnError::InvalidStateTransition` unless `Disconnected` or `Error`
    /// * `VpnError::InvalidAccessKey` for malformed keys
    /// * `PermissionError::RequestAlreadyInFlight` while a prompt is open
    pub fn begin_connect(&mut self, access_key: &str) -> Result<PendingPermission, AppError> {
        if !self.state.can_connect() {
            return Err(VpnError::InvalidStateTransition {
                from: self.state,
                operation: "connect",
            }
            .into());
        }

        let server = VpnServerDescriptor::from_key(AccessKey::parse(access_key)?);
        let pending = self.gate.request_permission()?;

        info!(server = %server.name, token = %pending.token(), "Connect requested, awaiting permission");
        self.pending = Some(PendingConnect {
            token: pending.token(),
            server,
        });
        self.publish();
        Ok(pending)
    }

    /// Apply a permission outcome for the request identified by `token`
    ///
    /// Outcomes for requests that are no longer pending are ignored.
    pub fn complete_connect(&mut self, token: RequestToken, outcome: PermissionOutcome) {
        let pending = match self.pending.take() {
            Some(pending) if pending.token == token => pending,
            other => {
                self.pending = other;
                debug!(%token, "Ignoring permission outcome for a stale request");
                return;
            }
        };

        match outcome {
            PermissionOutcome::Granted => self.start_tunnel(pending.server),
            PermissionOutcome::Denied => {
                warn!("VPN permission denied");
                self.fail(SessionError::PermissionDenied);
            }
            PermissionOutcome::Failed(reason) => {
                error!("VPN permission request failed: {}", reason);
                self.fail(SessionError::PermissionRequestFailed(reason));
            }
        }
    }

    fn start_tunnel(&mut self, server: VpnServerDescriptor) {
        if !self.state.can_connect() {
            warn!(state = %self.state, "Permission granted but session moved on, not starting tunnel");
            self.publish();
            return;
        }

        self.state = VpnConnectionState::Connecting;
        self.last_error = None;
        self.connecting_to = Some(server.clone());
        self.publish();

        info!(server = %server.name, "Starting tunnel");
        if let Err(e) = self.tunnel.start(&server) {
            error!("Tunnel start failed: {}", e);
            self.fail(SessionError::TunnelStartFailed(e.to_string()));
        }
    }

    /// Ask the tunnel to stop
    ///
    /// The state stays `Connecting`/`Connected` until the tunnel confirms
    /// with a `Stopped` event.
    pub fn disconnect(&mut self) -> Result<(), VpnError> {
        if !self.state.can_disconnect() {
            return Err(VpnError::InvalidStateTransition {
                from: self.state,
                operation: "disconnect",
            });
        }

        info!(state = %self.state, "Stopping tunnel");
        self.tunnel.stop()
    }

    /// Leave the `Error` state without touching the tunnel
    pub fn reset(&mut self) -> Result<(), VpnError> {
        if self.state != VpnConnectionState::Error {
            return Err(VpnError::InvalidStateTransition {
                from: self.state,
                operation: "reset",
            });
        }

        self.state = VpnConnectionState::Disconnected;
        self.last_error = None;
        self.publish();
        Ok(())
    }

    /// Apply a tunnel lifecycle event
    pub fn handle_event(&mut self, event: VpnEvent) {
        match self.state.on_event(event) {
            Transition::To(next) => {
                info!(from = %self.state, to = %next, ?event, "Session transition");
                self.state = next;
                self.after_transition(event);
                self.publish();
            }
            Transition::Unchanged => {
                debug!(state = %self.state, ?event, "Duplicate lifecycle event");
            }
            Transition::Unexpected => {
                warn!(state = %self.state, ?event, "Unexpected lifecycle event ignored");
            }
        }
    }

    fn after_transition(&mut self, event: VpnEvent) {
        match self.state {
            VpnConnectionState::Connected => {
                let now = Utc::now();
                self.connected_since = Some(now);
                if let Err(e) = self.prefs.save_start_time(now) {
                    warn!("Failed to persist tunnel start time: {}", e);
                }
                if let Some(server) = self.connecting_to.take() {
                    if let Err(e) = self.prefs.save_vpn_server(&server) {
                        warn!("Failed to persist connected server: {}", e);
                    }
                    self.server = Some(server);
                }
            }
            VpnConnectionState::Disconnected => {
                self.last_error = None;
                self.tunnel_down();
            }
            VpnConnectionState::Error => {
                if event == VpnEvent::Error {
                    self.last_error = Some(SessionError::TunnelSignalError);
                }
                self.tunnel_down();
            }
            VpnConnectionState::Connecting => {}
        }
    }

    fn tunnel_down(&mut self) {
        self.connecting_to = None;
        self.connected_since = None;
        if let Err(e) = self.prefs.clear_start_time() {
            warn!("Failed to clear tunnel start time: {}", e);
        }
    }

    fn fail(&mut self, error: SessionError) {
        self.state = VpnConnectionState::Error;
        self.last_error = Some(error);
        self.tunnel_down();
        self.publish();
    }

    /// Reconcile the in-memory state with the live tunnel status
    ///
    /// A running tunnel forces `Connected`; a tunnel found down while
    /// `Connected` forces `Disconnected`. `Connecting` is left alone, its
    /// outcome arrives as a lifecycle event.
    pub fn check_vpn_connection_state(&mut self) {
        let running = self.tunnel.is_running();

        let next = match (self.state, running) {
            (VpnConnectionState::Disconnected | VpnConnectionState::Error, true) => {
                Some(VpnConnectionState::Connected)
            }
            (VpnConnectionState::Connected, false) => Some(VpnConnectionState::Disconnected),
            _ => None,
        };

        match next {
            Some(VpnConnectionState::Connected) => {
                warn!(from = %self.state, "Tunnel is running, reconciling to connected");
                self.state = VpnConnectionState::Connected;
                self.last_error = None;
                self.connected_since = match self.prefs.start_time() {
                    Ok(Some(started)) => Some(started),
                    Ok(None) | Err(_) => {
                        let now = Utc::now();
                        if let Err(e) = self.prefs.save_start_time(now) {
                            warn!("Failed to persist tunnel start time: {}", e);
                        }
                        Some(now)
                    }
                };
            }
            Some(next) => {
                warn!(from = %self.state, to = %next, "Tunnel is down, reconciling");
                self.state = next;
                self.tunnel_down();
            }
            None => {
                if !running && self.state != VpnConnectionState::Connecting {
                    // Stale timestamp from a previous process
                    if let Ok(Some(_)) = self.prefs.start_time() {
                        debug!("Clearing stale tunnel start time");
                        self.tunnel_down();
                    }
                }
            }
        }

        self.publish();
    }

    /// Persist a server as the one to offer next time
    pub fn save_vpn_server(&mut self, server: VpnServerDescriptor) -> Result<(), AppError> {
        self.prefs.save_vpn_server(&server)?;
        info!(server = %server.name, "Saved VPN server");
        self.server = Some(server);
        self.publish();
        Ok(())
    }

    /// Restore the saved server into the snapshot
    pub fn load_last_vpn_server(&mut self) -> Result<Option<VpnServerDescriptor>, AppError> {
        let server = self.prefs.load_vpn_server()?;
        if server.is_some() {
            self.server = server.clone();
            self.publish();
        }
        Ok(server)
    }

    /// New waiter for the pending connect's permission request
    pub fn reattach_permission(&self) -> Option<PendingPermission> {
        let pending = self.pending.as_ref()?;
        match self.gate.reattach(pending.token) {
            Ok(waiter) => Some(waiter),
            Err(e) => {
                debug!("Cannot reattach permission request: {}", e);
                None
            }
        }
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            state: self.state,
            server: self.server.clone(),
            connected_since: self.connected_since,
            last_error: self.last_error.clone(),
            awaiting_permission: self.pending.is_some(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
