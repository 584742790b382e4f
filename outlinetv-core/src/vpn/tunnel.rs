//! Tunnel manager collaborator
//!
//! The tunnel transport itself lives outside this crate. [`TunnelManager`]
//! is the seam the session coordinator drives; completion of `start` and
//! `stop` is only ever observed through lifecycle signals on the
//! [`SignalHub`].

use super::broadcast::SignalHub;
use super::dynamic_key::DynamicKeyResolver;
use super::event::VpnEvent;
use crate::error::VpnError;
use crate::types::{AccessKey, VpnServerDescriptor};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// External tunnel manager
///
/// Calls must not block; start and stop only request the operation.
pub trait TunnelManager: Send + Sync {
    /// Request the tunnel to come up for `server`
    fn start(&self, server: &VpnServerDescriptor) -> Result<(), VpnError>;

    /// Request the tunnel to tear down
    fn stop(&self) -> Result<(), VpnError>;

    /// Live tunnel status, used for reconciliation on resume
    fn is_running(&self) -> bool;
}

struct RunningTunnel {
    generation: u64,
    stop_tx: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct TunnelSlot {
    generation: u64,
    running: Option<RunningTunnel>,
}

/// Runs an external tunnel client process
///
/// The access key is appended as the last argument; dynamic keys are
/// resolved first, off the caller's thread. `STARTED` is signalled once the
/// process is spawned, `STOPPED` on clean exit or after `stop()`, `ERROR` on
/// a non-zero exit or when a dynamic key cannot be resolved.
pub struct ProcessTunnelManager {
    program: String,
    args: Vec<String>,
    resolver: DynamicKeyResolver,
    hub: SignalHub,
    slot: Arc<Mutex<TunnelSlot>>,
}

impl ProcessTunnelManager {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        resolver: DynamicKeyResolver,
        hub: SignalHub,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            resolver,
            hub,
            slot: Arc::new(Mutex::new(TunnelSlot::default())),
        }
    }

    fn slot(&self) -> MutexGuard<'_, TunnelSlot> {
        lock_slot(&self.slot)
    }
}

fn lock_slot(slot: &Mutex<TunnelSlot>) -> MutexGuard<'_, TunnelSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_child(program: &str, args: &[String], key: &AccessKey) -> Result<Child, VpnError> {
    let mut child = Command::new(program)
        .args(args)
        .arg(key.expose())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| VpnError::TunnelStartFailed {
            reason: format!("Failed to spawn {}: {}", program, e),
        })?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(log_stderr(stderr));
    }
    Ok(child)
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("Tunnel stderr: {}", line);
    }
}

/// Background side of one tunnel run
struct TunnelRun {
    generation: u64,
    hub: SignalHub,
    slot: Arc<Mutex<TunnelSlot>>,
}

impl TunnelRun {
    /// Resolve a dynamic key, then spawn and watch the process
    async fn resolve_and_run(
        self,
        resolver: DynamicKeyResolver,
        key: AccessKey,
        command: (String, Vec<String>),
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        let resolved = tokio::select! {
            resolved = resolver.resolve(&key) => resolved,
            _ = &mut stop_rx => {
                info!("Tunnel stopped while resolving its access key");
                self.finish(VpnEvent::Stopped);
                return;
            }
        };

        let (program, args) = command;
        match resolved.and_then(|key| spawn_child(&program, &args, &key)) {
            Ok(child) => self.watch(child, stop_rx).await,
            Err(e) => {
                warn!(error = %e, "Tunnel failed to start");
                self.finish(VpnEvent::Error);
            }
        }
    }

    async fn watch(self, mut child: Child, stop_rx: oneshot::Receiver<()>) {
        info!(pid = ?child.id(), "Tunnel process spawned");
        self.hub.publish(VpnEvent::Started.signal());

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => {
                    info!("Tunnel process exited cleanly");
                    VpnEvent::Stopped
                }
                Ok(status) => {
                    warn!(%status, "Tunnel process failed");
                    VpnEvent::Error
                }
                Err(e) => {
                    warn!("Failed to wait for tunnel process: {}", e);
                    VpnEvent::Error
                }
            },
            _ = stop_rx => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill tunnel process: {}", e);
                }
                info!("Tunnel process stopped on request");
                VpnEvent::Stopped
            }
        };

        self.finish(outcome);
    }

    fn finish(self, outcome: VpnEvent) {
        {
            let mut slot = lock_slot(&self.slot);
            if slot.running.as_ref().map(|r| r.generation) == Some(self.generation) {
                slot.running = None;
            }
        }
        self.hub.publish(outcome.signal());
    }
}

impl TunnelManager for ProcessTunnelManager {
    fn start(&self, server: &VpnServerDescriptor) -> Result<(), VpnError> {
        let mut slot = self.slot();
        if slot.running.is_some() {
            return Err(VpnError::TunnelStartFailed {
                reason: "tunnel is already running".to_string(),
            });
        }

        // Static keys fail fast on a missing program
        let child = if server.key.is_dynamic() {
            None
        } else {
            Some(spawn_child(&self.program, &self.args, &server.key)?)
        };

        slot.generation += 1;
        let generation = slot.generation;
        let (stop_tx, stop_rx) = oneshot::channel();
        slot.running = Some(RunningTunnel {
            generation,
            stop_tx: Some(stop_tx),
        });
        drop(slot);

        info!(server = %server.name, dynamic = child.is_none(), "Starting tunnel process");
        let run = TunnelRun {
            generation,
            hub: self.hub.clone(),
            slot: Arc::clone(&self.slot),
        };

        match child {
            Some(child) => {
                tokio::spawn(run.watch(child, stop_rx));
            }
            None => {
                tokio::spawn(run.resolve_and_run(
                    self.resolver.clone(),
                    server.key.clone(),
                    (self.program.clone(), self.args.clone()),
                    stop_rx,
                ));
            }
        }

        Ok(())
    }

    fn stop(&self) -> Result<(), VpnError> {
        let stop_tx = self
            .slot()
            .running
            .as_mut()
            .and_then(|running| running.stop_tx.take());

        match stop_tx {
            Some(tx) => {
                if tx.send(()).is_err() {
                    debug!("Tunnel process already exiting");
                }
            }
            None => {
                // Nothing to tear down; let listeners converge on Stopped
                debug!("Stop requested with no running tunnel");
                self.hub.publish(VpnEvent::Stopped.signal());
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.slot().running.is_some()
    }
}
