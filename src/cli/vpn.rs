//! VPN session commands

use crate::cli::{open_preferences, prompt::{prompt_yes_no, TerminalPermissionPrompt}};
use chrono::{Local, Utc};
use colored::Colorize;
use outlinetv_core::{
    config::toml_config,
    error::{AppError, SessionError},
    permission::PermissionGate,
    screen::MainScreen,
    session::{SessionSnapshot, SessionRuntime, VpnSessionCoordinator},
    types::{AccessKey, VpnServerDescriptor},
    vpn::{DynamicKeyResolver, ProcessTunnelManager, SignalHub, VpnConnectionState},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Run the connect command
///
/// Stays in the foreground, printing state changes, until the tunnel stops.
/// Ctrl-C asks the tunnel to stop.
pub async fn run_connect(access_key: &str) -> Result<(), AppError> {
    let config = toml_config::load_config()?;
    let prefs = open_preferences()?;

    let hub = SignalHub::new();
    let resolver =
        DynamicKeyResolver::new(Duration::from_secs(config.tunnel.resolve_timeout_secs))?;
    let tunnel = ProcessTunnelManager::new(
        config.tunnel.command.clone(),
        config.tunnel.args.clone(),
        resolver,
        hub.clone(),
    );
    let gate = PermissionGate::new(Arc::new(TerminalPermissionPrompt));
    let coordinator = VpnSessionCoordinator::new(Arc::new(tunnel), gate, prefs);
    let (session, runtime) = SessionRuntime::spawn(coordinator);

    let mut screen = MainScreen::create(&hub, session.clone(), None, env!("CARGO_PKG_VERSION")).await;
    let result = follow_session(&mut screen, access_key).await;

    screen.destroy();
    session.shutdown();
    if let Err(e) = runtime.await {
        warn!("Session runtime ended abnormally: {}", e);
    }

    result
}

async fn follow_session(screen: &mut MainScreen, access_key: &str) -> Result<(), AppError> {
    let mut snapshots = screen.snapshots();
    let mut shown = Some(snapshots.borrow_and_update().state);
    screen.connect(access_key).await?;

    let mut attempt = ConnectAttempt::default();

    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if shown != Some(snapshot.state) {
            print_state(&snapshot);
            shown = Some(snapshot.state);
        }

        if let Some(outcome) = attempt.observe(&snapshot) {
            return outcome.map_err(AppError::from);
        }

        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c(), if !attempt.stopping => {
                attempt.stopping = true;
                println!();
                println!("Disconnecting...");
                if let Err(e) = screen.disconnect().await {
                    // Nothing to stop yet, e.g. still waiting for permission
                    warn!("Disconnect skipped: {}", e);
                    return Ok(());
                }
            }
        }
    }
}

/// Tracks a foreground connect until it ends
///
/// Snapshots are coalesced, so a tunnel that came up and went down between
/// two reads is never seen as `Connecting` or `Connected`. The attempt is
/// known to have run once the permission request is no longer pending.
#[derive(Debug, Default)]
struct ConnectAttempt {
    resolved: bool,
    stopping: bool,
}

impl ConnectAttempt {
    /// `Some` once the session has settled
    fn observe(&mut self, snapshot: &SessionSnapshot) -> Option<Result<(), SessionError>> {
        self.resolved |= !snapshot.awaiting_permission;

        match snapshot.state {
            VpnConnectionState::Error => Some(Err(snapshot
                .last_error
                .clone()
                .unwrap_or(SessionError::TunnelSignalError))),
            VpnConnectionState::Disconnected if self.resolved || self.stopping => Some(Ok(())),
            _ => None,
        }
    }
}

fn print_state(snapshot: &SessionSnapshot) {
    let server = snapshot
        .server
        .as_ref()
        .map(|s| s.name.as_str())
        .unwrap_or("unknown server");

    match snapshot.state {
        VpnConnectionState::Disconnected => println!("{} Disconnected", "●".dimmed()),
        VpnConnectionState::Connecting => println!("{} Connecting...", "●".yellow()),
        VpnConnectionState::Connected => {
            println!("{} Connected to {}", "●".green(), server.bold());
            println!("  Press Ctrl-C to disconnect");
        }
        VpnConnectionState::Error => {
            let reason = snapshot
                .last_error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown error".to_string());
            println!("{} Connection failed: {}", "●".red(), reason);
        }
    }
}

/// Run the save-server command
pub fn run_save_server(access_key: &str, name: Option<String>) -> Result<(), AppError> {
    let key = AccessKey::parse(access_key)?;
    let server = match name {
        Some(name) => VpnServerDescriptor::new(key, name),
        None => VpnServerDescriptor::from_key(key),
    };

    open_preferences()?.save_vpn_server(&server)?;
    println!("✅ Saved server {}", server.name.bold());
    Ok(())
}

/// Run the status command
pub fn run_status() -> Result<(), AppError> {
    let prefs = open_preferences()?;

    match prefs.load_vpn_server()? {
        Some(server) => println!("Saved server: {}", server.name.bold()),
        None => println!("Saved server: {}", "none".dimmed()),
    }

    match prefs.start_time()? {
        Some(started_at) => {
            let uptime = Utc::now().signed_duration_since(started_at);
            println!(
                "Tunnel:       {} since {} ({}h {:02}m)",
                "up".green(),
                started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                uptime.num_hours(),
                uptime.num_minutes() % 60
            );
        }
        None => println!("Tunnel:       {}", "down".dimmed()),
    }

    Ok(())
}

/// Run the forget command
pub fn run_forget(assume_yes: bool) -> Result<(), AppError> {
    if !assume_yes && !prompt_yes_no("Forget the saved server?", false)? {
        println!("Nothing changed.");
        return Ok(());
    }

    open_preferences()?.clear_all()?;
    println!("✅ Saved server forgotten");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: VpnConnectionState, awaiting_permission: bool) -> SessionSnapshot {
        SessionSnapshot {
            state,
            awaiting_permission,
            ..SessionSnapshot::default()
        }
    }

    #[test]
    fn test_waits_while_permission_is_pending() {
        let mut attempt = ConnectAttempt::default();
        assert_eq!(attempt.observe(&snapshot(VpnConnectionState::Disconnected, true)), None);
    }

    #[test]
    fn test_short_lived_tunnel_ends_the_attempt() {
        // Given: Connecting and Connected were coalesced away
        let mut attempt = ConnectAttempt::default();
        assert_eq!(attempt.observe(&snapshot(VpnConnectionState::Disconnected, true)), None);

        // When: The next snapshot is already back to Disconnected
        let outcome = attempt.observe(&snapshot(VpnConnectionState::Disconnected, false));

        // Then: The attempt is over
        assert_eq!(outcome, Some(Ok(())));
    }

    #[test]
    fn test_connected_tunnel_keeps_following() {
        let mut attempt = ConnectAttempt::default();
        assert_eq!(attempt.observe(&snapshot(VpnConnectionState::Connecting, false)), None);
        assert_eq!(attempt.observe(&snapshot(VpnConnectionState::Connected, false)), None);
        assert_eq!(
            attempt.observe(&snapshot(VpnConnectionState::Disconnected, false)),
            Some(Ok(()))
        );
    }

    #[test]
    fn test_error_ends_with_the_session_error() {
        let mut attempt = ConnectAttempt::default();
        let mut failed = snapshot(VpnConnectionState::Error, false);
        failed.last_error = Some(SessionError::PermissionDenied);

        assert_eq!(
            attempt.observe(&failed),
            Some(Err(SessionError::PermissionDenied))
        );
    }

    #[test]
    fn test_stopping_ends_on_disconnected() {
        let mut attempt = ConnectAttempt {
            stopping: true,
            ..ConnectAttempt::default()
        };
        assert_eq!(
            attempt.observe(&snapshot(VpnConnectionState::Disconnected, true)),
            Some(Ok(()))
        );
    }
}
