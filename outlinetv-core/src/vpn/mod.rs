//! VPN tunnel lifecycle
//!
//! Connection state machine, lifecycle events, the process-wide signal
//! channel, dynamic key resolution and the tunnel manager seam.

pub mod broadcast;
pub mod dynamic_key;
pub mod event;
pub mod state;
pub mod tunnel;

// Public re-exports
pub use broadcast::{BridgeRegistration, BroadcastEventBridge, SignalHub};
pub use dynamic_key::DynamicKeyResolver;
pub use event::VpnEvent;
pub use state::{Transition, VpnConnectionState};
pub use tunnel::{ProcessTunnelManager, TunnelManager};
