//! Tunnel lifecycle events
//!
//! The tunnel process announces its lifecycle with three payload-less
//! signals scoped to the application namespace. They are translated into the
//! closed [`VpnEvent`] set at the bridge boundary.

/// Namespace prefix of every tunnel lifecycle signal
pub const SIGNAL_NAMESPACE: &str = "app.outlinetv.vpn";

/// Signal published once the tunnel is up
pub const SIGNAL_STARTED: &str = "app.outlinetv.vpn.STARTED";
/// Signal published once the tunnel has torn down
pub const SIGNAL_STOPPED: &str = "app.outlinetv.vpn.STOPPED";
/// Signal published when the tunnel fails
pub const SIGNAL_ERROR: &str = "app.outlinetv.vpn.ERROR";

/// Lifecycle events emitted by the tunnel process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VpnEvent {
    Started,
    Stopped,
    Error,
}

impl VpnEvent {
    /// Translate a signal identifier, `None` for anything outside the set
    pub fn from_signal(signal: &str) -> Option<Self> {
        match signal {
            SIGNAL_STARTED => Some(Self::Started),
            SIGNAL_STOPPED => Some(Self::Stopped),
            SIGNAL_ERROR => Some(Self::Error),
            _ => None,
        }
    }

    /// Signal identifier carrying this event
    pub fn signal(self) -> &'static str {
        match self {
            Self::Started => SIGNAL_STARTED,
            Self::Stopped => SIGNAL_STOPPED,
            Self::Error => SIGNAL_ERROR,
        }
    }
}
