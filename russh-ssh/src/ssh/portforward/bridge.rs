//! Static bridge handler: the single `IoHandler` shared by every binding the
//! forwarder owns. Dispatches each accepted session to local forwarding,
//! remote (forwarded-tcpip) forwarding, or the SOCKS engine, based on which
//! registry map claims the session's local port.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::ForwardError;
use super::endpoint::{ForwardingMode, SocketEndpoint};
use super::events::{EventBroadcaster, PortForwardingEvent};
use super::registry::BindingRegistry;
use super::socks;
use super::traits::{ChannelState, ConnectionService, IoHandler, IoSession, Session, TcpipClientChannel};

/// Bookkeeping for a `forwarded-tcpip` session waiting on its channel to
/// finish opening, so `message_received` can block until the channel is
/// usable the way spec.md's static bridge handler does.
struct PendingChannel {
    channel: Box<dyn TcpipClientChannel>,
    conn_id: u32,
}

pub struct BridgeHandler {
    registry: Arc<BindingRegistry>,
    session: Arc<dyn Session>,
    events: Arc<EventBroadcaster>,
    connection_service: Arc<dyn ConnectionService>,
    next_conn_id: AtomicU32,
    /// One pending/opened channel per accepted connection, keyed by the
    /// `IoSession`'s pointer identity (its `Arc` address). A session is
    /// inserted in `session_created` and removed in `session_closed`.
    channels: Mutex<std::collections::HashMap<usize, PendingChannel>>,
}

impl BridgeHandler {
    pub fn new(
        registry: Arc<BindingRegistry>,
        session: Arc<dyn Session>,
        events: Arc<EventBroadcaster>,
        connection_service: Arc<dyn ConnectionService>,
    ) -> Self {
        Self {
            registry,
            session,
            events,
            connection_service,
            next_conn_id: AtomicU32::new(1),
            channels: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn session_key(session: &Arc<dyn IoSession>) -> usize {
        Arc::as_ptr(session) as *const () as usize
    }

    async fn register_channel(
        &self,
        io_session: &Arc<dyn IoSession>,
        channel: Box<dyn TcpipClientChannel>,
        mode: ForwardingMode,
        local: SocketEndpoint,
    ) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = channel.attach_output(io_session.clone()).await {
            tracing::warn!("failed to attach channel output for {}: {}", local, e);
        }
        self.connection_service.register_channel(conn_id).await;
        self.channels
            .lock()
            .await
            .insert(Self::session_key(io_session), PendingChannel { channel, conn_id });
        self.events
            .broadcast(PortForwardingEvent::ConnectionEstablished { mode, local })
            .await;
    }

    async fn fail_connection(&self, io_session: Arc<dyn IoSession>, mode: ForwardingMode, local: SocketEndpoint, reason: String) {
        tracing::warn!("{}", reason);
        io_session.close().await;
        self.events
            .broadcast(PortForwardingEvent::ConnectionFailed { mode, local, reason })
            .await;
    }

    async fn dispatch_dynamic(&self, io_session: Arc<dyn IoSession>) {
        let session = self.session.clone();
        let raw = match io_session.take_raw().await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("failed to take raw stream for SOCKS session: {}", e);
                return;
            }
        };
        tokio::spawn(async move {
            if let Err(e) = socks::engine::run(raw, session).await {
                tracing::debug!("SOCKS session ended with error: {}", e);
            }
        });
    }

    async fn dispatch_local(&self, io_session: Arc<dyn IoSession>, remote: SocketEndpoint) {
        let local = endpoint_of(io_session.local_address());
        match self.session.open_direct_tcpip(&remote).await {
            Ok(channel) => {
                if let Err(e) = channel.open().await {
                    self.fail_connection(io_session, ForwardingMode::Local, local, format!("direct-tcpip open failed for {remote}: {e}")).await;
                    return;
                }
                // Wire the channel's incoming SSH data straight back to the
                // accepted TCP session; message_received/write_data below
                // only carries bytes in the other direction.
                self.register_channel(&io_session, channel, ForwardingMode::Local, local).await;
            }
            Err(e) => {
                self.fail_connection(io_session, ForwardingMode::Local, local, format!("failed to open direct-tcpip channel to {remote}: {e}")).await;
            }
        }
    }

    /// Server-initiated (remote forwarding) connection: a TCP connection was
    /// accepted on a port this side bound via `local_port_forwarding_requested`,
    /// and must be forwarded to the peer as a `forwarded-tcpip` channel open,
    /// naming the bound endpoint and the accepted connection's originator.
    async fn dispatch_forwarded(&self, io_session: Arc<dyn IoSession>) {
        let bound = endpoint_of(io_session.local_address());
        let originator = endpoint_of(io_session.peer_address());

        match self.session.create_forwarded_tcpip_channel(&bound, &originator).await {
            Ok(channel) => {
                if let Err(e) = channel.open().await {
                    self.fail_connection(io_session, ForwardingMode::Remote, bound, format!("forwarded-tcpip open failed: {e}")).await;
                    return;
                }
                self.register_channel(&io_session, channel, ForwardingMode::Remote, bound).await;
            }
            Err(e) => {
                self.fail_connection(io_session, ForwardingMode::Remote, bound, format!("failed to open forwarded-tcpip channel: {e}")).await;
            }
        }
    }
}

#[async_trait]
impl IoHandler for BridgeHandler {
    async fn session_created(&self, session: Arc<dyn IoSession>) {
        let port = session.local_address().port();

        if self.registry.dynamic_local.read().await.contains_key(&port) {
            self.dispatch_dynamic(session).await;
            return;
        }
        if let Some(remote) = self.registry.local_to_remote.read().await.get(&port).cloned() {
            self.dispatch_local(session, remote).await;
            return;
        }
        self.dispatch_forwarded(session).await;
    }

    async fn message_received(&self, session: Arc<dyn IoSession>, data: Vec<u8>) {
        let key = Self::session_key(&session);

        let state = {
            let channels = self.channels.lock().await;
            match channels.get(&key) {
                Some(pending) => Some(pending.channel.state()),
                None => None,
            }
        };

        let channel_ready = match state {
            Some(ChannelState::Opened) => true,
            Some(ChannelState::Closed) => false,
            Some(ChannelState::Opening) | None => {
                // Block until the channel resolves, as spec.md's
                // messageReceived design requires, rather than dropping
                // bytes that arrived before the channel finished opening.
                let resolved = {
                    let channels = self.channels.lock().await;
                    match channels.get(&key) {
                        Some(pending) => Some(pending.channel.wait_for(&[
                            ChannelState::Opened,
                            ChannelState::Closed,
                        ]).await),
                        None => None,
                    }
                };
                matches!(resolved, Some(ChannelState::Opened))
            }
        };

        if !channel_ready {
            // No channel registered, or it closed before opening completed:
            // drop the data rather than tearing down the TCP session, which
            // may still receive further bytes or close on its own.
            return;
        }

        let channels = self.channels.lock().await;
        if let Some(pending) = channels.get(&key) {
            if let Err(e) = pending.channel.write_data(&data).await {
                tracing::warn!("failed to write forwarded data to channel: {}", e);
            }
        }
    }

    async fn session_closed(&self, session: Arc<dyn IoSession>) {
        let key = Self::session_key(&session);
        if let Some(pending) = self.channels.lock().await.remove(&key) {
            self.connection_service.unregister_channel(pending.conn_id).await;
            let _ = pending.channel.close(false).await;
        }
    }

    async fn exception_caught(&self, session: Arc<dyn IoSession>, error: ForwardError) {
        tracing::warn!("forwarded session error: {}", error);
        self.session_closed(session).await;
    }
}

/// Infallible conversion of a resolved `SocketAddr` to a [`SocketEndpoint`];
/// unlike the wildcard/hostname case `SocketEndpoint::try_from` guards
/// against, an accepted connection's local/peer address is always a
/// concrete IP.
fn endpoint_of(addr: std::net::SocketAddr) -> SocketEndpoint {
    SocketEndpoint::new(addr.ip().to_string(), addr.port())
}
