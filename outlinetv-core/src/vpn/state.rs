//! VPN connection state management
//!
//! Defines the state machine for the VPN session lifecycle. The transition
//! table is pure so the coordinator can apply it one event at a time and
//! tolerate duplicate or out-of-order lifecycle signals.

use super::event::VpnEvent;

/// VPN connection states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VpnConnectionState {
    /// Not connected
    #[default]
    Disconnected,

    /// Permission granted and tunnel start requested
    Connecting,

    /// Tunnel reported it is up
    Connected,

    /// Permission or tunnel failure
    Error,
}

/// Outcome of applying a lifecycle event to a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given state
    To(VpnConnectionState),
    /// Event is a duplicate of the current state, nothing to do
    Unchanged,
    /// Event makes no sense in the current state and is dropped
    Unexpected,
}

impl VpnConnectionState {
    /// Apply a lifecycle event from the tunnel process
    ///
    /// `Error` is honored from every state since it reflects the last known
    /// truth from the process boundary. `Started` only completes a pending
    /// connect.
    pub fn on_event(self, event: VpnEvent) -> Transition {
        use VpnConnectionState::*;

        match (self, event) {
            (Connecting, VpnEvent::Started) => Transition::To(Connected),
            (Connected, VpnEvent::Started) => Transition::Unchanged,
            (Disconnected | Error, VpnEvent::Started) => Transition::Unexpected,

            (Disconnected, VpnEvent::Stopped) => Transition::Unchanged,
            (Connecting | Connected | Error, VpnEvent::Stopped) => Transition::To(Disconnected),

            (Error, VpnEvent::Error) => Transition::Unchanged,
            (_, VpnEvent::Error) => Transition::To(Error),
        }
    }

    /// Whether `connect()` may be issued from this state
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Whether `disconnect()` may be issued from this state
    pub fn can_disconnect(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for VpnConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VpnConnectionState::Disconnected => write!(f, "disconnected"),
            VpnConnectionState::Connecting => write!(f, "connecting"),
            VpnConnectionState::Connected => write!(f, "connected"),
            VpnConnectionState::Error => write!(f, "error"),
        }
    }
}
