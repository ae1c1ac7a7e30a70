//! TCP/IP port forwarding: local (`-L`), remote (`-R`) and dynamic (`-D`,
//! SOCKS5) forwarding over an SSH session.
//!
//! [`facade::Forwarder`] is the single entry point. It owns a
//! [`registry::BindingRegistry`] tracking which local ports are bound and
//! what they map to, an [`traits::IoAcceptor`] accepting inbound TCP
//! connections, a [`bridge::BridgeHandler`] dispatching each accepted
//! connection to the right forwarding mode, and an
//! [`events::EventBroadcaster`] notifying [`events::PortForwardingEventListener`]s
//! of established/torn-down forwards.

pub mod acceptor;
pub mod bridge;
pub mod endpoint;
pub mod events;
pub mod facade;
pub mod registry;
pub mod socks;
pub mod tokio_io;
pub mod traits;
pub mod wire;

pub use endpoint::{ForwardRecord, ForwardingMode, PortForwardSpec, SocketEndpoint};
pub use events::{PortForwardingEvent, PortForwardingEventListener};
pub use facade::{Forwarder, PortForwardingConfig};
pub use traits::ForwardingFilter;
