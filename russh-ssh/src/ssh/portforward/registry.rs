//! Binding registry: the single source of truth for which local ports are
//! bound, what they map to, and which dynamic (SOCKS) proxies are running.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::endpoint::{ForwardRecord, ForwardingMode, LocalForwardingEntry, SocketEndpoint};

/// Handle to a running SOCKS proxy on one local port, held so `stop_dynamic`
/// and `close` can force-abort its connection-handling tasks.
pub struct SocksProxyHandle {
    pub local_port: u16,
    pub bound_address: std::net::SocketAddr,
    pub tasks: RwLock<Vec<tokio::task::AbortHandle>>,
}

impl SocksProxyHandle {
    pub async fn abort_all(&self) {
        for task in self.tasks.read().await.iter() {
            task.abort();
        }
    }
}

/// The three maps and one set spec.md's data model names, each behind its
/// own lock so concurrent reads from accepted-connection tasks never
/// contend with the facade's coarse mutating lock.
#[derive(Default)]
pub struct BindingRegistry {
    pub local_to_remote: RwLock<HashMap<u16, SocketEndpoint>>,
    pub remote_to_local: RwLock<HashMap<u16, SocketEndpoint>>,
    /// Host originally passed to `tcpip-forward` for a client-initiated
    /// remote forward, keyed by the resolved port. Needed because
    /// `cancel-tcpip-forward` must re-send the same bind host (§6), which
    /// `remote_to_local`'s value (the local dial target) does not carry.
    pub remote_bind_host: RwLock<HashMap<u16, String>>,
    pub dynamic_local: RwLock<HashMap<u16, Arc<SocksProxyHandle>>>,
    pub local_forwards: RwLock<HashSet<LocalForwardingEntry>>,
    /// Actual OS-resolved bind address for each port in `local_to_remote` or
    /// `remote_to_local`'s server-accepted counterpart, so `stop_*`/`*Cancelled`
    /// unbind the address the acceptor actually holds rather than recomputing a
    /// host that may not match (e.g. a wildcard bind unbound as `127.0.0.1`).
    pub bound_addresses: RwLock<HashMap<u16, std::net::SocketAddr>>,
    established_at: RwLock<HashMap<(ForwardingMode, u16), chrono::DateTime<chrono::Utc>>>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_established(&self, mode: ForwardingMode, port: u16, now: chrono::DateTime<chrono::Utc>) {
        self.established_at.write().await.insert((mode, port), now);
    }

    pub async fn clear_established(&self, mode: ForwardingMode, port: u16) {
        self.established_at.write().await.remove(&(mode, port));
    }

    pub async fn snapshot(&self) -> Vec<ForwardRecord> {
        let mut records = Vec::new();
        let established = self.established_at.read().await;

        for (port, remote) in self.local_to_remote.read().await.iter() {
            if let Some(ts) = established.get(&(ForwardingMode::Local, *port)) {
                records.push(ForwardRecord {
                    mode: ForwardingMode::Local,
                    local: SocketEndpoint::new("127.0.0.1", *port),
                    remote: Some(remote.clone()),
                    established_at: *ts,
                });
            }
        }
        for (port, local) in self.remote_to_local.read().await.iter() {
            if let Some(ts) = established.get(&(ForwardingMode::Remote, *port)) {
                records.push(ForwardRecord {
                    mode: ForwardingMode::Remote,
                    local: local.clone(),
                    remote: Some(SocketEndpoint::new("", *port)),
                    established_at: *ts,
                });
            }
        }
        for (port, handle) in self.dynamic_local.read().await.iter() {
            if let Some(ts) = established.get(&(ForwardingMode::Dynamic, *port)) {
                records.push(ForwardRecord {
                    mode: ForwardingMode::Dynamic,
                    local: SocketEndpoint::new(handle.bound_address.ip().to_string(), *port),
                    remote: None,
                    established_at: *ts,
                });
            }
        }
        records
    }
}
