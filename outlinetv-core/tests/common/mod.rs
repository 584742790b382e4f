//! Shared fixtures for integration tests

#![allow(dead_code)]

use outlinetv_core::error::VpnError;
use outlinetv_core::permission::{PermissionGate, PermissionOutcome, PermissionPrompt, PermissionResponder};
use outlinetv_core::prefs::{MemoryPreferenceStore, VpnPreferences};
use outlinetv_core::session::{SessionSnapshot, VpnSessionCoordinator};
use outlinetv_core::types::VpnServerDescriptor;
use outlinetv_core::vpn::{TunnelManager, VpnConnectionState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

pub const ACCESS_KEY: &str =
    "ss://Y2hhY2hhMjAtaWV0Zi1wb2x5MTMwNTpzZWNyZXQ@203.0.113.7:8388/?outline=1#Living%20Room";
pub const SERVER_NAME: &str = "Living Room";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelCall {
    Start(String),
    Stop,
}

/// Tunnel that records calls and never emits signals on its own
#[derive(Default)]
pub struct RecordingTunnel {
    running: AtomicBool,
    start_failure: Option<String>,
    calls: Mutex<Vec<TunnelCall>>,
}

impl RecordingTunnel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A tunnel that was already up before the coordinator existed
    pub fn already_running() -> Arc<Self> {
        let tunnel = Self::default();
        tunnel.running.store(true, Ordering::SeqCst);
        Arc::new(tunnel)
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            start_failure: Some(reason.to_string()),
            ..Self::default()
        })
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TunnelCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl TunnelManager for RecordingTunnel {
    fn start(&self, server: &VpnServerDescriptor) -> Result<(), VpnError> {
        self.calls
            .lock()
            .unwrap()
            .push(TunnelCall::Start(server.name.clone()));
        if let Some(reason) = &self.start_failure {
            return Err(VpnError::TunnelStartFailed {
                reason: reason.clone(),
            });
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), VpnError> {
        self.calls.lock().unwrap().push(TunnelCall::Stop);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Prompt that answers immediately with a fixed outcome
pub struct AutoPrompt {
    outcome: PermissionOutcome,
    launches: Mutex<usize>,
}

impl AutoPrompt {
    pub fn new(outcome: PermissionOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            launches: Mutex::new(0),
        })
    }

    pub fn launches(&self) -> usize {
        *self.launches.lock().unwrap()
    }
}

impl PermissionPrompt for AutoPrompt {
    fn launch(&self, responder: PermissionResponder) {
        *self.launches.lock().unwrap() += 1;
        match self.outcome.clone() {
            PermissionOutcome::Granted => responder.grant(),
            PermissionOutcome::Denied => responder.deny(),
            PermissionOutcome::Failed(reason) => responder.fail(reason),
        }
    }
}

/// Prompt that holds responders until the test answers
#[derive(Default)]
pub struct ManualPrompt {
    responders: Mutex<Vec<PermissionResponder>>,
    launches: Mutex<usize>,
}

impl ManualPrompt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> PermissionResponder {
        self.responders
            .lock()
            .unwrap()
            .pop()
            .expect("Should have shown a prompt")
    }

    pub fn launches(&self) -> usize {
        *self.launches.lock().unwrap()
    }
}

impl PermissionPrompt for ManualPrompt {
    fn launch(&self, responder: PermissionResponder) {
        *self.launches.lock().unwrap() += 1;
        self.responders.lock().unwrap().push(responder);
    }
}

pub fn memory_prefs() -> VpnPreferences {
    VpnPreferences::new(Arc::new(MemoryPreferenceStore::new()))
}

pub fn coordinator(
    prompt: Arc<dyn PermissionPrompt>,
    tunnel: Arc<RecordingTunnel>,
    prefs: VpnPreferences,
) -> VpnSessionCoordinator {
    VpnSessionCoordinator::new(tunnel, PermissionGate::new(prompt), prefs)
}

/// Wait until the session reaches `state`
pub async fn wait_for_state(
    snapshots: &mut watch::Receiver<SessionSnapshot>,
    state: VpnConnectionState,
) -> SessionSnapshot {
    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        snapshots.wait_for(|snapshot| snapshot.state == state),
    )
    .await
    .unwrap_or_else(|_| panic!("Timed out waiting for {}", state))
    .expect("Session runtime should still be running");
    snapshot.clone()
}
