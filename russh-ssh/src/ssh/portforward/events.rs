//! Event broadcaster for port-forwarding lifecycle notifications.

use std::sync::Arc;

use tokio::sync::RwLock;

use super::endpoint::{ForwardingMode, SocketEndpoint};

/// A lifecycle notification emitted by the [`super::facade::Forwarder`].
///
/// `local_side` mirrors spec.md's `localSide` flag: `true` when `local` is
/// the endpoint this side bound (local and dynamic forwarding, and the
/// server-side acceptance of a peer's `tcpip-forward`), `false` when `local`
/// is merely the dial target of a bind this side does not own (remote
/// forwarding initiated from here).
#[derive(Debug, Clone)]
pub enum PortForwardingEvent {
    Establishing {
        mode: ForwardingMode,
        local: SocketEndpoint,
        remote: Option<SocketEndpoint>,
        local_side: bool,
    },
    Established {
        mode: ForwardingMode,
        local: SocketEndpoint,
        remote: Option<SocketEndpoint>,
        local_side: bool,
        error: Option<String>,
    },
    TearingDown {
        mode: ForwardingMode,
        local: SocketEndpoint,
        local_side: bool,
    },
    TornDown {
        mode: ForwardingMode,
        local: SocketEndpoint,
        local_side: bool,
        error: Option<String>,
    },
    ConnectionEstablished {
        mode: ForwardingMode,
        local: SocketEndpoint,
    },
    ConnectionFailed {
        mode: ForwardingMode,
        local: SocketEndpoint,
        reason: String,
    },
}

/// Receives [`PortForwardingEvent`] notifications from the facade. Modeled
/// as a trait (a capability collection) rather than a dynamic proxy: Rust
/// has no reflective multi-method proxy equivalent, so each event variant is
/// dispatched through the single `on_event` method and matched by the
/// listener. `on_event` returns a `Result` so a failing listener can be
/// isolated by the broadcaster instead of silently swallowed at the call
/// site.
pub trait PortForwardingEventListener: Send + Sync {
    fn on_event(&self, event: &PortForwardingEvent) -> Result<(), String>;
}

/// Thread-safe fan-out to a dynamic set of listeners. Listeners are invoked
/// in registration order; a listener's error is caught and logged, never
/// allowed to interrupt delivery to the rest.
#[derive(Default)]
pub struct EventBroadcaster {
    listeners: RwLock<Vec<Arc<dyn PortForwardingEventListener>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_listener(&self, listener: Arc<dyn PortForwardingEventListener>) {
        self.listeners.write().await.push(listener);
    }

    pub async fn remove_listener(&self, listener: &Arc<dyn PortForwardingEventListener>) {
        let mut listeners = self.listeners.write().await;
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub async fn broadcast(&self, event: PortForwardingEvent) {
        let snapshot = self.listeners.read().await.clone();
        for listener in snapshot {
            if let Err(e) = listener.on_event(&event) {
                tracing::warn!("port forwarding listener failed: {}", e);
            }
        }
    }
}
