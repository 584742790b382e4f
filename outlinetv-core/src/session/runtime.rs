//! Session runtime
//!
//! Runs a [`VpnSessionCoordinator`] on one task. Commands from the
//! presentation layer and lifecycle events from the broadcast bridge share
//! one queue and are applied strictly one at a time in arrival order;
//! background work only hands immutable results back through that queue.

use super::{SessionSnapshot, VpnSessionCoordinator};
use crate::error::{AppError, VpnError};
use crate::permission::{PendingPermission, PermissionOutcome, RequestToken};
use crate::types::VpnServerDescriptor;
use crate::vpn::{BridgeRegistration, BroadcastEventBridge, SignalHub, VpnEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Input accepted by the session runtime
enum SessionCommand {
    Event(VpnEvent),
    Connect {
        access_key: String,
        reply: oneshot::Sender<Result<PendingPermission, AppError>>,
    },
    PermissionResolved {
        token: RequestToken,
        outcome: PermissionOutcome,
    },
    Disconnect {
        reply: oneshot::Sender<Result<(), VpnError>>,
    },
    Reset {
        reply: oneshot::Sender<Result<(), VpnError>>,
    },
    SaveServer {
        server: VpnServerDescriptor,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    LoadLastServer,
    CheckState,
    ReattachPermission {
        reply: oneshot::Sender<Option<PendingPermission>>,
    },
    Shutdown,
}

impl From<VpnEvent> for SessionCommand {
    fn from(event: VpnEvent) -> Self {
        SessionCommand::Event(event)
    }
}

/// Event loop owning the coordinator
pub struct SessionRuntime {
    coordinator: VpnSessionCoordinator,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
}

impl SessionRuntime {
    /// Create a runtime and the handle used to drive it
    pub fn new(coordinator: VpnSessionCoordinator) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            command_tx,
            snapshot_rx: coordinator.subscribe(),
        };

        (
            Self {
                coordinator,
                command_rx,
            },
            handle,
        )
    }

    /// Create a runtime and spawn it on the current tokio runtime
    pub fn spawn(coordinator: VpnSessionCoordinator) -> (SessionHandle, JoinHandle<()>) {
        let (runtime, handle) = Self::new(coordinator);
        (handle, tokio::spawn(runtime.run()))
    }

    /// Process commands and events until shutdown or every handle is dropped
    pub async fn run(mut self) {
        info!(state = %self.coordinator.state(), "Session runtime started");

        while let Some(command) = self.command_rx.recv().await {
            if matches!(command, SessionCommand::Shutdown) {
                break;
            }
            self.handle_command(command);
        }

        info!(state = %self.coordinator.state(), "Session runtime stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Event(event) => self.coordinator.handle_event(event),
            SessionCommand::Connect { access_key, reply } => {
                let result = self.coordinator.begin_connect(&access_key);
                if let Err(Ok(pending)) = reply.send(result) {
                    // Caller went away; the request stays claimable via reattach
                    debug!(token = %pending.token(), "Connect caller dropped before reply");
                }
            }
            SessionCommand::PermissionResolved { token, outcome } => {
                self.coordinator.complete_connect(token, outcome);
            }
            SessionCommand::Disconnect { reply } => {
                let _ = reply.send(self.coordinator.disconnect());
            }
            SessionCommand::Reset { reply } => {
                let _ = reply.send(self.coordinator.reset());
            }
            SessionCommand::SaveServer { server, reply } => {
                let _ = reply.send(self.coordinator.save_vpn_server(server));
            }
            SessionCommand::LoadLastServer => {
                if let Err(e) = self.coordinator.load_last_vpn_server() {
                    warn!("Failed to load saved server: {}", e);
                }
            }
            SessionCommand::CheckState => self.coordinator.check_vpn_connection_state(),
            SessionCommand::ReattachPermission { reply } => {
                let _ = reply.send(self.coordinator.reattach_permission());
            }
            SessionCommand::Shutdown => {}
        }
    }
}

/// Cloneable client of a [`SessionRuntime`]
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, VpnError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(make(tx))
            .map_err(|_| VpnError::SessionClosed)?;
        rx.await.map_err(|_| VpnError::SessionClosed)
    }

    fn notify(&self, command: SessionCommand) {
        if self.command_tx.send(command).is_err() {
            debug!("Session runtime is gone, dropping command");
        }
    }

    /// Start a connect; the returned waiter resolves with the permission answer
    ///
    /// The answer must be handed back with
    /// [`permission_resolved`](Self::permission_resolved).
    pub async fn connect(&self, access_key: &str) -> Result<PendingPermission, AppError> {
        let access_key = access_key.to_string();
        self.request(|reply| SessionCommand::Connect { access_key, reply })
            .await?
    }

    /// Hand a permission answer back to the session
    ///
    /// A no-op once the runtime has stopped.
    pub fn permission_resolved(&self, token: RequestToken, outcome: PermissionOutcome) {
        self.notify(SessionCommand::PermissionResolved { token, outcome });
    }

    pub async fn disconnect(&self) -> Result<(), VpnError> {
        self.request(|reply| SessionCommand::Disconnect { reply })
            .await?
    }

    pub async fn reset(&self) -> Result<(), VpnError> {
        self.request(|reply| SessionCommand::Reset { reply }).await?
    }

    pub async fn save_vpn_server(&self, server: VpnServerDescriptor) -> Result<(), AppError> {
        self.request(|reply| SessionCommand::SaveServer { server, reply })
            .await?
    }

    pub fn load_last_vpn_server(&self) {
        self.notify(SessionCommand::LoadLastServer);
    }

    pub fn check_vpn_connection_state(&self) {
        self.notify(SessionCommand::CheckState);
    }

    /// New waiter for a connect still waiting on permission
    pub async fn reattach_permission(&self) -> Option<PendingPermission> {
        self.request(|reply| SessionCommand::ReattachPermission { reply })
            .await
            .ok()
            .flatten()
    }

    /// Feed tunnel lifecycle signals from `hub` into this session
    pub fn bridge(&self, hub: &SignalHub) -> BridgeRegistration {
        BroadcastEventBridge::register(hub, self.command_tx.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn shutdown(&self) {
        self.notify(SessionCommand::Shutdown);
    }
}
