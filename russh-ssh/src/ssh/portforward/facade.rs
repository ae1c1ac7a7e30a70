//! The Forwarder facade: the single entry point the rest of the crate
//! (and, concretely, [`super::super::client::SshClient`]) drives to start
//! and stop local, remote and dynamic port forwards.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::ForwardError;
use super::acceptor::do_bind;
use super::bridge::BridgeHandler;
use super::endpoint::{ForwardRecord, ForwardingMode, LocalForwardingEntry, SocketEndpoint};
use super::events::{EventBroadcaster, PortForwardingEvent, PortForwardingEventListener};
use super::registry::{BindingRegistry, SocksProxyHandle};
use super::traits::{ConnectionService, ForwardingFilter, IoAcceptor, NullConnectionService, PermitAllFilter, Session};
use super::wire;

/// Configuration for the forwarder's interactions with the SSH session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PortForwardingConfig {
    /// How long to wait for a `tcpip-forward`/`cancel-tcpip-forward` global
    /// request to be acknowledged.
    #[serde(with = "duration_millis")]
    pub tcpip_forward_request_timeout: Duration,
}

impl Default for PortForwardingConfig {
    fn default() -> Self {
        Self {
            tcpip_forward_request_timeout: Duration::from_millis(15_000),
        }
    }
}

impl PortForwardingConfig {
    /// Set the `tcpip-forward`/`cancel-tcpip-forward` reply timeout.
    pub fn with_tcpip_forward_request_timeout(mut self, timeout: Duration) -> Self {
        self.tcpip_forward_request_timeout = timeout;
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// The Forwarder facade. One instance per SSH session.
pub struct Forwarder {
    facade_lock: Mutex<()>,
    registry: Arc<BindingRegistry>,
    events: Arc<EventBroadcaster>,
    acceptor: Arc<dyn IoAcceptor>,
    bridge: Arc<BridgeHandler>,
    session: Arc<dyn Session>,
    filter: Arc<dyn ForwardingFilter>,
    config: PortForwardingConfig,
    closed: AtomicBool,
}

impl Forwarder {
    pub fn new(session: Arc<dyn Session>, acceptor: Arc<dyn IoAcceptor>) -> Self {
        Self::with_config_and_filter(session, acceptor, PortForwardingConfig::default(), Arc::new(PermitAllFilter))
    }

    pub fn with_config_and_filter(
        session: Arc<dyn Session>,
        acceptor: Arc<dyn IoAcceptor>,
        config: PortForwardingConfig,
        filter: Arc<dyn ForwardingFilter>,
    ) -> Self {
        Self::with_config_filter_and_connection_service(
            session,
            acceptor,
            config,
            filter,
            Arc::new(NullConnectionService),
        )
    }

    /// Full constructor, additionally wiring a [`ConnectionService`] that
    /// observes channel registration (spec.md §4.3/§6). Defaults to
    /// [`NullConnectionService`] via the other constructors when the caller
    /// has no use for it.
    pub fn with_config_filter_and_connection_service(
        session: Arc<dyn Session>,
        acceptor: Arc<dyn IoAcceptor>,
        config: PortForwardingConfig,
        filter: Arc<dyn ForwardingFilter>,
        connection_service: Arc<dyn ConnectionService>,
    ) -> Self {
        let registry = Arc::new(BindingRegistry::new());
        let events = Arc::new(EventBroadcaster::new());
        let bridge = Arc::new(BridgeHandler::new(
            registry.clone(),
            session.clone(),
            events.clone(),
            connection_service,
        ));
        Self {
            facade_lock: Mutex::new(()),
            registry,
            events,
            acceptor,
            bridge,
            session,
            filter,
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn add_listener(&self, listener: Arc<dyn PortForwardingEventListener>) {
        self.events.add_listener(listener).await;
    }

    pub async fn remove_listener(&self, listener: &Arc<dyn PortForwardingEventListener>) {
        self.events.remove_listener(listener).await;
    }

    pub async fn list_forwards(&self) -> Vec<ForwardRecord> {
        self.registry.snapshot().await
    }

    fn check_open(&self) -> Result<(), ForwardError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ForwardError::IllegalState("forwarder is closed".into()));
        }
        Ok(())
    }

    fn local_socket_addr(local: &SocketEndpoint) -> Result<SocketAddr, ForwardError> {
        local
            .bind_address()
            .parse()
            .map_err(|e| ForwardError::InvalidArgument(format!("invalid local endpoint {local}: {e}")))
    }

    // ---- local forwarding -------------------------------------------------

    pub async fn start_local(
        &self,
        local: SocketEndpoint,
        remote: SocketEndpoint,
    ) -> Result<SocketEndpoint, ForwardError> {
        let _guard = self.facade_lock.lock().await;
        self.check_open()?;

        self.events
            .broadcast(PortForwardingEvent::Establishing {
                mode: ForwardingMode::Local,
                local: local.clone(),
                remote: Some(remote.clone()),
                local_side: true,
            })
            .await;

        match self.start_local_inner(&local, &remote).await {
            Ok(resolved_local) => {
                self.events
                    .broadcast(PortForwardingEvent::Established {
                        mode: ForwardingMode::Local,
                        local: resolved_local.clone(),
                        remote: Some(remote),
                        local_side: true,
                        error: None,
                    })
                    .await;
                Ok(resolved_local)
            }
            Err(e) => {
                // Defensive unwind per spec.md: a failed start_local may have
                // left a partial bind behind. stop_local's own errors are
                // secondary and never override the original failure. Uses
                // the `_locked` form since the facade lock is already held
                // here and `tokio::sync::Mutex` is not reentrant.
                if let Err(cleanup_err) = self.stop_local_locked(local.port).await {
                    tracing::debug!("defensive stop_local after failed start_local: {}", cleanup_err);
                }
                self.events
                    .broadcast(PortForwardingEvent::Established {
                        mode: ForwardingMode::Local,
                        local: local.clone(),
                        remote: Some(remote),
                        local_side: true,
                        error: Some(e.to_string()),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn start_local_inner(
        &self,
        local: &SocketEndpoint,
        remote: &SocketEndpoint,
    ) -> Result<SocketEndpoint, ForwardError> {
        if !self.filter.can_listen(local) {
            return Err(ForwardError::FilterFailure(local.to_string()));
        }

        {
            let bound = self.registry.local_to_remote.read().await;
            if bound.contains_key(&local.port) && local.port != 0 {
                return Err(ForwardError::DuplicateBinding { port: local.port });
            }
        }

        let addr = Self::local_socket_addr(local)?;
        let resolved = match do_bind(self.acceptor.as_ref(), addr, self.bridge.clone()).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.close_on_bind_exhaustion().await;
                return Err(e);
            }
        };

        let resolved_local = SocketEndpoint::try_from(resolved)?;
        {
            let mut bound = self.registry.local_to_remote.write().await;
            if bound.contains_key(&resolved_local.port) {
                self.acceptor.unbind(resolved).await;
                return Err(ForwardError::DuplicateBinding { port: resolved_local.port });
            }
            bound.insert(resolved_local.port, remote.clone());
        }
        self.registry.bound_addresses.write().await.insert(resolved_local.port, resolved);
        self.registry
            .mark_established(ForwardingMode::Local, resolved_local.port, now())
            .await;

        Ok(resolved_local)
    }

    pub async fn stop_local(&self, local_port: u16) -> Result<(), ForwardError> {
        let _guard = self.facade_lock.lock().await;
        self.stop_local_locked(local_port).await
    }

    async fn stop_local_locked(&self, local_port: u16) -> Result<(), ForwardError> {
        let remote = self
            .registry
            .local_to_remote
            .write()
            .await
            .remove(&local_port)
            .ok_or_else(|| ForwardError::NotFound(format!("local forward on port {local_port}")))?;
        let _ = remote;

        let bound_local = SocketEndpoint::new("127.0.0.1", local_port);
        self.events
            .broadcast(PortForwardingEvent::TearingDown {
                mode: ForwardingMode::Local,
                local: bound_local.clone(),
                local_side: true,
            })
            .await;

        let result = self.unbind_tracked(local_port).await;

        self.registry.clear_established(ForwardingMode::Local, local_port).await;

        self.events
            .broadcast(PortForwardingEvent::TornDown {
                mode: ForwardingMode::Local,
                local: bound_local,
                local_side: true,
                error: result.as_ref().err().map(|e| e.to_string()),
            })
            .await;

        result
    }

    /// Unbind the acceptor at the address actually resolved for `port`
    /// (tracked in `registry.bound_addresses`), falling back to a loopback
    /// guess only if nothing was recorded (shouldn't happen in practice).
    async fn unbind_tracked(&self, port: u16) -> Result<(), ForwardError> {
        let addr = self
            .registry
            .bound_addresses
            .write()
            .await
            .remove(&port)
            .unwrap_or_else(|| SocketAddr::from((std::net::Ipv4Addr::LOCALHOST, port)));
        self.acceptor.unbind(addr).await;
        Ok(())
    }

    // ---- remote forwarding -------------------------------------------------

    pub async fn start_remote(
        &self,
        remote: SocketEndpoint,
        local: SocketEndpoint,
    ) -> Result<SocketEndpoint, ForwardError> {
        let _guard = self.facade_lock.lock().await;
        self.check_open()?;

        self.events
            .broadcast(PortForwardingEvent::Establishing {
                mode: ForwardingMode::Remote,
                local: local.clone(),
                remote: Some(remote.clone()),
                local_side: false,
            })
            .await;

        match self.start_remote_inner(&remote, &local).await {
            Ok(resolved_remote) => {
                self.events
                    .broadcast(PortForwardingEvent::Established {
                        mode: ForwardingMode::Remote,
                        local,
                        remote: Some(resolved_remote.clone()),
                        local_side: false,
                        error: None,
                    })
                    .await;
                Ok(resolved_remote)
            }
            Err(e) => {
                if let Err(cleanup_err) = self.stop_remote_locked(remote.port).await {
                    tracing::debug!("defensive stop_remote after failed start_remote: {}", cleanup_err);
                }
                self.events
                    .broadcast(PortForwardingEvent::Established {
                        mode: ForwardingMode::Remote,
                        local,
                        remote: Some(remote),
                        local_side: false,
                        error: Some(e.to_string()),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn start_remote_inner(
        &self,
        remote: &SocketEndpoint,
        local: &SocketEndpoint,
    ) -> Result<SocketEndpoint, ForwardError> {
        if !self.filter.can_listen(local) {
            return Err(ForwardError::FilterFailure(local.to_string()));
        }

        if remote.port != 0 && self.registry.remote_to_local.read().await.contains_key(&remote.port) {
            return Err(ForwardError::DuplicateBinding { port: remote.port });
        }

        let payload = wire::encode_tcpip_forward_request(&remote.host, remote.port);
        let reply = self
            .session
            .request("tcpip-forward", payload, self.config.tcpip_forward_request_timeout)
            .await?;
        let assigned_port = wire::decode_tcpip_forward_reply(&reply)?;
        let resolved_port = assigned_port.unwrap_or(remote.port);
        let resolved_remote = SocketEndpoint::new(remote.host.clone(), resolved_port);

        // TODO: the mapping is inserted only after the SSH request completes,
        // leaving a window where a forwarded-tcpip open for this port could
        // race ahead of the registry entry it needs. Carried forward
        // unfixed; see module docs.
        self.registry
            .remote_to_local
            .write()
            .await
            .insert(resolved_port, local.clone());
        self.registry
            .remote_bind_host
            .write()
            .await
            .insert(resolved_port, remote.host.clone());
        self.registry
            .mark_established(ForwardingMode::Remote, resolved_port, now())
            .await;

        Ok(resolved_remote)
    }

    pub async fn stop_remote(&self, remote_port: u16) -> Result<(), ForwardError> {
        let _guard = self.facade_lock.lock().await;
        self.stop_remote_locked(remote_port).await
    }

    async fn stop_remote_locked(&self, remote_port: u16) -> Result<(), ForwardError> {
        if !self.registry.remote_to_local.read().await.contains_key(&remote_port) {
            return Err(ForwardError::NotFound(format!("remote forward on port {remote_port}")));
        }

        let bound_remote = SocketEndpoint::new("", remote_port);
        self.events
            .broadcast(PortForwardingEvent::TearingDown {
                mode: ForwardingMode::Remote,
                local: bound_remote.clone(),
                local_side: false,
            })
            .await;

        // Fire-and-forget per spec.md: `cancel-tcpip-forward` carries
        // wantReply=false, written directly rather than awaited as a request.
        // Must name the same host originally passed to `tcpip-forward`, not
        // an empty placeholder.
        let bind_host = self
            .registry
            .remote_bind_host
            .write()
            .await
            .remove(&remote_port)
            .unwrap_or_default();
        let payload = wire::encode_tcpip_forward_request(&bind_host, remote_port);
        let result = self.session.write_packet(payload).await;

        self.registry.remote_to_local.write().await.remove(&remote_port);
        self.registry.clear_established(ForwardingMode::Remote, remote_port).await;

        self.events
            .broadcast(PortForwardingEvent::TornDown {
                mode: ForwardingMode::Remote,
                local: bound_remote,
                local_side: false,
                error: result.as_ref().err().map(|e| e.to_string()),
            })
            .await;

        result
    }

    // ---- dynamic (SOCKS) forwarding ---------------------------------------

    pub async fn start_dynamic(&self, local: SocketEndpoint) -> Result<SocketEndpoint, ForwardError> {
        let _guard = self.facade_lock.lock().await;
        self.check_open()?;

        self.events
            .broadcast(PortForwardingEvent::Establishing {
                mode: ForwardingMode::Dynamic,
                local: local.clone(),
                remote: None,
                local_side: true,
            })
            .await;

        match self.start_dynamic_inner(&local).await {
            Ok(resolved_local) => {
                self.events
                    .broadcast(PortForwardingEvent::Established {
                        mode: ForwardingMode::Dynamic,
                        local: resolved_local.clone(),
                        remote: None,
                        local_side: true,
                        error: None,
                    })
                    .await;
                Ok(resolved_local)
            }
            Err(e) => {
                if let Err(cleanup_err) = self.stop_dynamic_locked(local.port).await {
                    tracing::debug!("defensive stop_dynamic after failed start_dynamic: {}", cleanup_err);
                }
                self.events
                    .broadcast(PortForwardingEvent::Established {
                        mode: ForwardingMode::Dynamic,
                        local: local.clone(),
                        remote: None,
                        local_side: true,
                        error: Some(e.to_string()),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn start_dynamic_inner(&self, local: &SocketEndpoint) -> Result<SocketEndpoint, ForwardError> {
        if !self.filter.can_listen(local) {
            return Err(ForwardError::FilterFailure(local.to_string()));
        }

        if local.port != 0 && self.registry.dynamic_local.read().await.contains_key(&local.port) {
            return Err(ForwardError::DuplicateBinding { port: local.port });
        }

        let addr = Self::local_socket_addr(local)?;
        let resolved = match do_bind(self.acceptor.as_ref(), addr, self.bridge.clone()).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.close_on_bind_exhaustion().await;
                return Err(e);
            }
        };

        let handle = Arc::new(SocksProxyHandle {
            local_port: resolved.port(),
            bound_address: resolved,
            tasks: tokio::sync::RwLock::new(Vec::new()),
        });

        {
            let mut dynamic = self.registry.dynamic_local.write().await;
            if dynamic.contains_key(&resolved.port()) {
                self.acceptor.unbind(resolved).await;
                return Err(ForwardError::DuplicateBinding { port: resolved.port() });
            }
            dynamic.insert(resolved.port(), handle);
        }
        self.registry
            .mark_established(ForwardingMode::Dynamic, resolved.port(), now())
            .await;

        SocketEndpoint::try_from(resolved)
    }

    pub async fn stop_dynamic(&self, local_port: u16) -> Result<(), ForwardError> {
        let _guard = self.facade_lock.lock().await;
        self.stop_dynamic_locked(local_port).await
    }

    async fn stop_dynamic_locked(&self, local_port: u16) -> Result<(), ForwardError> {
        let handle = self
            .registry
            .dynamic_local
            .write()
            .await
            .remove(&local_port)
            .ok_or_else(|| ForwardError::NotFound(format!("dynamic forward on port {local_port}")))?;

        let bound_local = SocketEndpoint::new("127.0.0.1", local_port);
        self.events
            .broadcast(PortForwardingEvent::TearingDown {
                mode: ForwardingMode::Dynamic,
                local: bound_local.clone(),
                local_side: true,
            })
            .await;

        handle.abort_all().await;
        self.acceptor.unbind(handle.bound_address).await;
        self.registry.clear_established(ForwardingMode::Dynamic, local_port).await;

        self.events
            .broadcast(PortForwardingEvent::TornDown {
                mode: ForwardingMode::Dynamic,
                local: bound_local,
                local_side: true,
                error: None,
            })
            .await;

        Ok(())
    }

    // ---- server-initiated (forwarded-tcpip) lifecycle ---------------------

    /// Invoked when the peer's `tcpip-forward` global request asks this side
    /// to bind a local port and forward accepted connections back as
    /// `forwarded-tcpip` channels.
    pub async fn local_port_forwarding_requested(
        &self,
        requested: SocketEndpoint,
    ) -> Result<SocketEndpoint, ForwardError> {
        let _guard = self.facade_lock.lock().await;
        self.check_open()?;

        self.events
            .broadcast(PortForwardingEvent::Establishing {
                mode: ForwardingMode::Remote,
                local: requested.clone(),
                remote: None,
                local_side: true,
            })
            .await;

        match self.local_port_forwarding_requested_inner(&requested).await {
            Ok(resolved_local) => {
                self.events
                    .broadcast(PortForwardingEvent::Established {
                        mode: ForwardingMode::Remote,
                        local: resolved_local.clone(),
                        remote: None,
                        local_side: true,
                        error: None,
                    })
                    .await;
                Ok(resolved_local)
            }
            Err(e) => {
                self.events
                    .broadcast(PortForwardingEvent::Established {
                        mode: ForwardingMode::Remote,
                        local: requested.clone(),
                        remote: None,
                        local_side: true,
                        error: Some(e.to_string()),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn local_port_forwarding_requested_inner(
        &self,
        requested: &SocketEndpoint,
    ) -> Result<SocketEndpoint, ForwardError> {
        if !self.filter.can_listen(requested) {
            return Err(ForwardError::FilterFailure(requested.to_string()));
        }

        let addr = Self::local_socket_addr(requested)?;
        let resolved = do_bind(self.acceptor.as_ref(), addr, self.bridge.clone()).await?;
        let resolved_local = SocketEndpoint::try_from(resolved)?;

        if let Err(register_err) = self
            .register_forwarded_binding(&resolved_local, requested, resolved)
            .await
        {
            // Fixed from the upstream bug this preserves elsewhere: the
            // secondary failure from defensive cleanup is attached to the
            // *original* error, not to itself.
            if let Err(cleanup_err) = self.unbind_forwarded(&resolved_local, resolved).await {
                return Err(register_err.with_suppressed(cleanup_err));
            }
            return Err(register_err);
        }

        Ok(resolved_local)
    }

    async fn register_forwarded_binding(
        &self,
        resolved: &SocketEndpoint,
        requested: &SocketEndpoint,
        bound_addr: SocketAddr,
    ) -> Result<(), ForwardError> {
        {
            let mut forwards = self.registry.local_forwards.write().await;
            if forwards.iter().any(|entry| entry.bound.port == resolved.port) {
                return Err(ForwardError::DuplicateBinding { port: resolved.port });
            }
            forwards.insert(LocalForwardingEntry {
                bound: resolved.clone(),
                requested: requested.clone(),
            });
        }
        self.registry.bound_addresses.write().await.insert(resolved.port, bound_addr);
        self.registry.mark_established(ForwardingMode::Remote, resolved.port, now()).await;
        Ok(())
    }

    async fn unbind_forwarded(&self, resolved: &SocketEndpoint, bound_addr: SocketAddr) -> Result<(), ForwardError> {
        let _ = resolved;
        self.acceptor.unbind(bound_addr).await;
        Ok(())
    }

    /// Invoked when the peer cancels a previously granted `tcpip-forward`.
    /// `requested` is matched against either the bound or the originally
    /// requested host at its port, per spec.md's "bound host first — critical
    /// for later lookup" note: a cancel naming the bound host of a
    /// wildcard-bound port must still find the binding.
    pub async fn local_port_forwarding_cancelled(&self, requested: SocketEndpoint) -> Result<(), ForwardError> {
        let _guard = self.facade_lock.lock().await;

        let entry = {
            let forwards = self.registry.local_forwards.read().await;
            forwards
                .iter()
                .find(|entry| entry.matches(&requested))
                .cloned()
        }
        .ok_or_else(|| ForwardError::NotFound(format!("no binding for {requested}")))?;
        let port = entry.bound.port;

        self.events
            .broadcast(PortForwardingEvent::TearingDown {
                mode: ForwardingMode::Remote,
                local: requested.clone(),
                local_side: true,
            })
            .await;

        let addr = self
            .registry
            .bound_addresses
            .write()
            .await
            .remove(&port)
            .unwrap_or_else(|| SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), port));
        self.acceptor.unbind(addr).await;
        self.registry.local_forwards.write().await.remove(&entry);
        self.registry.clear_established(ForwardingMode::Remote, port).await;

        self.events
            .broadcast(PortForwardingEvent::TornDown {
                mode: ForwardingMode::Remote,
                local: requested,
                local_side: true,
                error: None,
            })
            .await;

        Ok(())
    }

    pub async fn get_forwarded_port(&self, remote_port: u16) -> Option<SocketEndpoint> {
        self.registry.remote_to_local.read().await.get(&remote_port).cloned()
    }

    // ---- closeable core -----------------------------------------------------

    async fn close_on_bind_exhaustion(&self) {
        if self.acceptor.bound_addresses().await.is_empty() {
            tracing::warn!("all bindings lost, closing forwarder");
            let _ = self.close().await;
        }
    }

    pub async fn close(&self) -> Result<(), ForwardError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handles: Vec<Arc<SocksProxyHandle>> = self
            .registry
            .dynamic_local
            .write()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in &handles {
            handle.abort_all().await;
        }

        self.acceptor.close().await;

        self.registry.local_to_remote.write().await.clear();
        self.registry.remote_to_local.write().await.clear();
        self.registry.remote_bind_host.write().await.clear();
        self.registry.local_forwards.write().await.clear();
        self.registry.bound_addresses.write().await.clear();

        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::portforward::traits::{ChannelState, IoHandler, IoSession, RawDuplex, TcpipClientChannel};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex as AsyncMutex;

    struct MockChannel {
        state: AsyncMutex<ChannelState>,
    }

    #[async_trait]
    impl TcpipClientChannel for MockChannel {
        async fn open(&self) -> Result<(), ForwardError> {
            *self.state.lock().await = ChannelState::Opened;
            Ok(())
        }
        fn state(&self) -> ChannelState {
            ChannelState::Opened
        }
        async fn wait_for(&self, _states: &[ChannelState]) -> ChannelState {
            ChannelState::Opened
        }
        async fn write_data(&self, _bytes: &[u8]) -> Result<(), ForwardError> {
            Ok(())
        }
        async fn close(&self, _force: bool) -> Result<(), ForwardError> {
            Ok(())
        }
        async fn take_stream(&self) -> Result<Box<dyn RawDuplex>, ForwardError> {
            Err(ForwardError::IoFailure {
                operation: "take_stream".into(),
                reason: "not exercised in this test".into(),
            })
        }
        async fn attach_output(&self, _sink: Arc<dyn IoSession>) -> Result<(), ForwardError> {
            Ok(())
        }
    }

    struct MockSession {
        reply: StdMutex<Option<Vec<u8>>>,
        deny: bool,
    }

    #[async_trait]
    impl Session for MockSession {
        async fn request(&self, name: &str, _payload: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>, ForwardError> {
            if self.deny {
                return Err(ForwardError::RequestDenied {
                    name: name.to_string(),
                    reason: "denied by mock".into(),
                });
            }
            Ok(self.reply.lock().unwrap().clone().unwrap_or_default())
        }

        async fn write_packet(&self, _payload: Vec<u8>) -> Result<(), ForwardError> {
            if self.deny {
                return Err(ForwardError::IoFailure {
                    operation: "write_packet".into(),
                    reason: "denied by mock".into(),
                });
            }
            Ok(())
        }

        async fn open_direct_tcpip(&self, _target: &SocketEndpoint) -> Result<Box<dyn TcpipClientChannel>, ForwardError> {
            Ok(Box::new(MockChannel {
                state: AsyncMutex::new(ChannelState::Opening),
            }))
        }

        async fn create_forwarded_tcpip_channel(
            &self,
            _bound: &SocketEndpoint,
            _originator: &SocketEndpoint,
        ) -> Result<Box<dyn TcpipClientChannel>, ForwardError> {
            Ok(Box::new(MockChannel {
                state: AsyncMutex::new(ChannelState::Opening),
            }))
        }
    }

    struct MockAcceptor {
        bound: AsyncMutex<HashMap<SocketAddr, ()>>,
        next_port: AsyncMutex<u16>,
    }

    impl MockAcceptor {
        fn new() -> Self {
            Self {
                bound: AsyncMutex::new(HashMap::new()),
                next_port: AsyncMutex::new(40000),
            }
        }
    }

    #[async_trait]
    impl IoAcceptor for MockAcceptor {
        async fn bind(&self, address: SocketAddr, _handler: Arc<dyn IoHandler>) -> Result<SocketAddr, ForwardError> {
            let resolved = if address.port() == 0 {
                let mut next = self.next_port.lock().await;
                let port = *next;
                *next += 1;
                SocketAddr::new(address.ip(), port)
            } else {
                address
            };
            self.bound.lock().await.insert(resolved, ());
            Ok(resolved)
        }

        async fn unbind(&self, address: SocketAddr) {
            self.bound.lock().await.remove(&address);
        }

        async fn bound_addresses(&self) -> Vec<SocketAddr> {
            self.bound.lock().await.keys().cloned().collect()
        }

        async fn close(&self) {
            self.bound.lock().await.clear();
        }
    }

    fn forwarder(deny_requests: bool) -> Forwarder {
        let session: Arc<dyn Session> = Arc::new(MockSession {
            reply: StdMutex::new(None),
            deny: deny_requests,
        });
        let acceptor: Arc<dyn IoAcceptor> = Arc::new(MockAcceptor::new());
        Forwarder::new(session, acceptor)
    }

    // Scenario S1: starting a local forward binds and registers it.
    #[tokio::test]
    async fn start_local_registers_binding() {
        let f = forwarder(false);
        let resolved = f
            .start_local(SocketEndpoint::new("127.0.0.1", 0), SocketEndpoint::new("example.com", 80))
            .await
            .unwrap();
        assert!(f.registry.local_to_remote.read().await.contains_key(&resolved.port));
    }

    // Duplicate local binding on the same fixed port is rejected.
    #[tokio::test]
    async fn start_local_rejects_duplicate_port() {
        let f = forwarder(false);
        f.start_local(SocketEndpoint::new("127.0.0.1", 9000), SocketEndpoint::new("a", 1))
            .await
            .unwrap();
        let err = f
            .start_local(SocketEndpoint::new("127.0.0.1", 9000), SocketEndpoint::new("b", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::DuplicateBinding { port: 9000 }));
    }

    // Scenario: stopping a local forward unregisters it and frees the port.
    #[tokio::test]
    async fn stop_local_removes_binding() {
        let f = forwarder(false);
        let resolved = f
            .start_local(SocketEndpoint::new("127.0.0.1", 9001), SocketEndpoint::new("a", 1))
            .await
            .unwrap();
        f.stop_local(resolved.port).await.unwrap();
        assert!(!f.registry.local_to_remote.read().await.contains_key(&resolved.port));
    }

    // Scenario S2/S6: remote forwarding registers after the SSH reply, and
    // the assigned-port-0 case resolves from the reply payload.
    #[tokio::test]
    async fn start_remote_uses_assigned_port_from_reply() {
        let session = Arc::new(MockSession {
            reply: StdMutex::new(Some(54321u32.to_be_bytes().to_vec())),
            deny: false,
        });
        let acceptor: Arc<dyn IoAcceptor> = Arc::new(MockAcceptor::new());
        let f = Forwarder::new(session, acceptor);

        let resolved = f
            .start_remote(SocketEndpoint::new("0.0.0.0", 0), SocketEndpoint::new("127.0.0.1", 22))
            .await
            .unwrap();
        assert_eq!(resolved.port, 54321);
        assert_eq!(f.get_forwarded_port(54321).await.unwrap().port, 22);
    }

    // A denied tcpip-forward request surfaces as RequestDenied and never
    // touches the registry, matching the honest-failure behavior documented
    // for adapters that can't issue real SSH global requests.
    #[tokio::test]
    async fn start_remote_surfaces_request_denied() {
        let f = forwarder(true);
        let err = f
            .start_remote(SocketEndpoint::new("0.0.0.0", 8080), SocketEndpoint::new("127.0.0.1", 22))
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::RequestDenied { .. }));
        assert!(f.registry.remote_to_local.read().await.is_empty());
    }

    // Scenario S3: dynamic forwarding binds a port that is tracked
    // separately from local_to_remote.
    #[tokio::test]
    async fn start_dynamic_registers_proxy_handle() {
        let f = forwarder(false);
        let resolved = f.start_dynamic(SocketEndpoint::new("127.0.0.1", 0)).await.unwrap();
        assert!(f.registry.dynamic_local.read().await.contains_key(&resolved.port));
    }

    // Closeable Core: close() tears down every binding and flips the closed
    // flag so subsequent calls observe IllegalState.
    #[tokio::test]
    async fn close_tears_down_all_bindings_and_rejects_further_calls() {
        let f = forwarder(false);
        f.start_local(SocketEndpoint::new("127.0.0.1", 9002), SocketEndpoint::new("a", 1))
            .await
            .unwrap();
        f.start_dynamic(SocketEndpoint::new("127.0.0.1", 0)).await.unwrap();

        f.close().await.unwrap();

        assert!(f.acceptor.bound_addresses().await.is_empty());
        let err = f
            .start_local(SocketEndpoint::new("127.0.0.1", 9003), SocketEndpoint::new("a", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::IllegalState(_)));
    }

    // get_forwarded_port returns None for a port that was never registered.
    #[tokio::test]
    async fn get_forwarded_port_returns_none_when_absent() {
        let f = forwarder(false);
        assert!(f.get_forwarded_port(12345).await.is_none());
    }

    // Universal property (testable property #4): establishing precedes
    // established precedes tearing-down precedes torn-down, in that exact
    // order, for a single local-forward round-trip.
    #[tokio::test]
    async fn establishing_established_tearingdown_torndown_are_ordered() {
        struct Recorder(StdMutex<Vec<String>>);
        impl PortForwardingEventListener for Recorder {
            fn on_event(&self, event: &PortForwardingEvent) -> Result<(), String> {
                let label = match event {
                    PortForwardingEvent::Establishing { .. } => "establishing",
                    PortForwardingEvent::Established { .. } => "established",
                    PortForwardingEvent::TearingDown { .. } => "tearing-down",
                    PortForwardingEvent::TornDown { .. } => "torn-down",
                    PortForwardingEvent::ConnectionEstablished { .. } => "conn-established",
                    PortForwardingEvent::ConnectionFailed { .. } => "conn-failed",
                };
                self.0.lock().unwrap().push(label.to_string());
                Ok(())
            }
        }

        let f = forwarder(false);
        let recorder = Arc::new(Recorder(StdMutex::new(Vec::new())));
        f.add_listener(recorder.clone()).await;

        let resolved = f
            .start_local(SocketEndpoint::new("127.0.0.1", 9004), SocketEndpoint::new("a", 1))
            .await
            .unwrap();
        f.stop_local(resolved.port).await.unwrap();

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events, vec!["establishing", "established", "tearing-down", "torn-down"]);
    }

    // Scenario S4: a peer's tcpip-forward request binds a local port and
    // registers it in local_forwards (not remote_to_local, which is reserved
    // for forwards this side initiated itself).
    #[tokio::test]
    async fn local_port_forwarding_requested_registers_local_forward() {
        let f = forwarder(false);
        let resolved = f
            .local_port_forwarding_requested(SocketEndpoint::new("0.0.0.0", 0))
            .await
            .unwrap();

        assert!(f
            .registry
            .local_forwards
            .read()
            .await
            .iter()
            .any(|e| e.bound.port == resolved.port));
        assert!(!f.registry.remote_to_local.read().await.contains_key(&resolved.port));
    }

    // A filter that vetoes the requested host prevents any bind or
    // registration from happening.
    #[tokio::test]
    async fn local_port_forwarding_requested_honors_filter() {
        struct DenyAll;
        impl ForwardingFilter for DenyAll {
            fn can_listen(&self, _local: &SocketEndpoint) -> bool {
                false
            }
        }

        let session: Arc<dyn Session> = Arc::new(MockSession {
            reply: StdMutex::new(None),
            deny: false,
        });
        let acceptor: Arc<dyn IoAcceptor> = Arc::new(MockAcceptor::new());
        let f = Forwarder::with_config_and_filter(
            session,
            acceptor,
            PortForwardingConfig::default(),
            Arc::new(DenyAll),
        );

        let err = f
            .local_port_forwarding_requested(SocketEndpoint::new("0.0.0.0", 9100))
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::FilterFailure(_)));
        assert!(f.registry.local_forwards.read().await.is_empty());
    }

    // Cancellation round-trip: a bound forwarded binding can be looked up and
    // torn down by the host the peer originally requested, even though the
    // registry stores the resolved bound host alongside it.
    #[tokio::test]
    async fn local_port_forwarding_cancelled_removes_binding() {
        let f = forwarder(false);
        let requested = SocketEndpoint::new("0.0.0.0", 0);
        let resolved = f.local_port_forwarding_requested(requested.clone()).await.unwrap();

        // Cancellation may name the bound port on the originally requested
        // host rather than the resolved one.
        let cancel_target = SocketEndpoint::new(requested.host.clone(), resolved.port);
        f.local_port_forwarding_cancelled(cancel_target).await.unwrap();

        assert!(f.registry.local_forwards.read().await.is_empty());
        assert!(!f.registry.bound_addresses.read().await.contains_key(&resolved.port));
    }

    // Cancelling an endpoint with no matching binding surfaces NotFound.
    #[tokio::test]
    async fn local_port_forwarding_cancelled_rejects_unknown_binding() {
        let f = forwarder(false);
        let err = f
            .local_port_forwarding_cancelled(SocketEndpoint::new("127.0.0.1", 9999))
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::NotFound(_)));
    }

    #[test]
    fn port_forwarding_config_serialization_roundtrip() {
        let config = PortForwardingConfig::default()
            .with_tcpip_forward_request_timeout(Duration::from_secs(5));

        let json = serde_json::to_string(&config).unwrap();
        let deserialized: PortForwardingConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.tcpip_forward_request_timeout, deserialized.tcpip_forward_request_timeout);
    }

    // The suppressed-error fix: local_port_forwarding_requested attaches a
    // cleanup failure to the *original* error, not to itself.
    #[tokio::test]
    async fn suppressed_error_attaches_to_primary_not_itself() {
        let primary = ForwardError::InvalidArgument("primary".into());
        let secondary = ForwardError::IoFailure {
            operation: "cleanup".into(),
            reason: "secondary".into(),
        };
        let combined = primary.with_suppressed(secondary);
        match combined {
            ForwardError::Suppressed { primary, suppressed } => {
                assert!(matches!(*primary, ForwardError::InvalidArgument(_)));
                assert_eq!(suppressed.len(), 1);
            }
            other => panic!("expected Suppressed, got {other:?}"),
        }
    }
}
