//! Endpoint and mode types shared across the forwarding registry and wire codec.

use std::fmt;
use std::net::SocketAddr;

use crate::error::ForwardError;

/// A host/port pair as it appears in forwarding requests and wire messages.
///
/// Unlike `SocketAddr`, the host is kept as a string: it may be a hostname
/// that only the remote peer can resolve (e.g. the target of a `direct-tcpip`
/// open), or the empty/`0.0.0.0` wildcard used when requesting a bind on all
/// interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SocketEndpoint {
    pub host: String,
    pub port: u16,
}

impl SocketEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// True if this endpoint's host denotes "all interfaces".
    pub fn is_wildcard(&self) -> bool {
        self.host.is_empty() || self.host == "0.0.0.0" || self.host == "::"
    }

    /// Render as a `host:port` string for bind/connect calls.
    pub fn bind_address(&self) -> String {
        if self.is_wildcard() {
            format!("0.0.0.0:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl TryFrom<SocketAddr> for SocketEndpoint {
    type Error = ForwardError;

    fn try_from(addr: SocketAddr) -> Result<Self, Self::Error> {
        Ok(SocketEndpoint {
            host: addr.ip().to_string(),
            port: addr.port(),
        })
    }
}

/// Which of the three forwarding modes a binding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ForwardingMode {
    Local,
    Remote,
    Dynamic,
}

impl fmt::Display for ForwardingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ForwardingMode::Local => "local",
            ForwardingMode::Remote => "remote",
            ForwardingMode::Dynamic => "dynamic",
        };
        f.write_str(s)
    }
}

/// One entry of the server-side local-forwarding bookkeeping set, created
/// when a peer's `tcpip-forward` request is granted: the host we actually
/// bound (`bound`, resolved after a wildcard/port-0 bind) paired with the
/// host the peer originally asked for (`requested`). Cancellation may name
/// either one, so lookups match against both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalForwardingEntry {
    pub bound: SocketEndpoint,
    pub requested: SocketEndpoint,
}

impl LocalForwardingEntry {
    /// True if `endpoint` names this entry's bound port and either its
    /// bound or requested host.
    pub fn matches(&self, endpoint: &SocketEndpoint) -> bool {
        self.bound.port == endpoint.port
            && (self.bound.host == endpoint.host || self.requested.host == endpoint.host)
    }
}

/// A forward to establish, as stored in a [`crate::session::SessionProfile`]
/// and handed to the [`super::facade::Forwarder`] once a session connects.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum PortForwardSpec {
    Local {
        local_port: u16,
        remote_host: String,
        remote_port: u16,
    },
    Remote {
        remote_port: u16,
        local_host: String,
        local_port: u16,
    },
    Dynamic { local_port: u16 },
}

/// Read-only snapshot of one active forward, for introspection/listing.
#[derive(Debug, Clone)]
pub struct ForwardRecord {
    pub mode: ForwardingMode,
    pub local: SocketEndpoint,
    pub remote: Option<SocketEndpoint>,
    pub established_at: chrono::DateTime<chrono::Utc>,
}
