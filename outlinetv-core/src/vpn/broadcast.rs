//! Process-wide signal channel and the bridge into the session
//!
//! [`SignalHub`] is an in-process replacement for a system broadcast
//! channel: publishers emit string identifiers, any number of listeners may
//! subscribe. [`BroadcastEventBridge`] filters the three tunnel lifecycle
//! identifiers and republishes them as [`VpnEvent`]s to a single consumer.

use super::event::VpnEvent;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Buffered signals per listener before it starts lagging
const HUB_CAPACITY: usize = 32;

/// Process-wide publish/subscribe channel keyed by string identifiers
#[derive(Debug, Clone)]
pub struct SignalHub {
    tx: broadcast::Sender<String>,
}

impl SignalHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    /// Publish a signal, returning how many listeners saw it
    pub fn publish(&self, signal: &str) -> usize {
        match self.tx.send(signal.to_string()) {
            Ok(listeners) => listeners,
            Err(_) => {
                debug!(signal, "Signal published with no listeners");
                0
            }
        }
    }

    /// Subscribe to every signal published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridges the signal hub into the session's event queue
pub struct BroadcastEventBridge;

impl BroadcastEventBridge {
    /// Start forwarding tunnel lifecycle signals to `sink`
    ///
    /// The hub subscription is taken before this returns, so any signal
    /// published afterwards is delivered even if the forwarding task has not
    /// been polled yet. Register before issuing a tunnel start.
    ///
    /// Events are sent as `T`, so they can share a queue with other input
    /// of the consumer and keep their arrival order.
    pub fn register<T>(hub: &SignalHub, sink: mpsc::UnboundedSender<T>) -> BridgeRegistration
    where
        T: From<VpnEvent> + Send + 'static,
    {
        let mut rx = hub.subscribe();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(signal) => {
                        let Some(event) = VpnEvent::from_signal(&signal) else {
                            trace!(signal = %signal, "Ignoring unrelated signal");
                            continue;
                        };
                        debug!(?event, "Forwarding tunnel signal");
                        if sink.send(T::from(event)).is_err() {
                            debug!("Event consumer is gone, stopping bridge");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Bridge lagged behind the signal hub");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        BridgeRegistration { task: Some(task) }
    }
}

/// Live bridge subscription; dropping it unregisters the bridge
#[derive(Debug)]
pub struct BridgeRegistration {
    task: Option<JoinHandle<()>>,
}

impl BridgeRegistration {
    /// Stop forwarding signals
    pub fn unregister(mut self) {
        self.stop();
    }

    /// Whether signals are still being forwarded
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Broadcast bridge unregistered");
        }
    }
}

impl Drop for BridgeRegistration {
    fn drop(&mut self) {
        self.stop();
    }
}
