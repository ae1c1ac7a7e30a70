//! External collaborator interfaces.
//!
//! Everything in this module is a seam the forwarding core consumes but does
//! not own the implementation of: the SSH session, its channel layer, and the
//! async I/O substrate. Production code is wired against the concrete
//! adapters in [`super::tokio_io`]; tests substitute mocks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ForwardError;
use super::endpoint::SocketEndpoint;

/// Lifecycle state of a `direct-tcpip`/`forwarded-tcpip` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Opening,
    Opened,
    Closed,
}

/// A client-side SSH channel carrying forwarded TCP bytes.
///
/// Mirrors the subset of an SSH channel's API the forwarder needs: open,
/// observe state transitions, write, and close. Reading is exposed by
/// taking the underlying duplex stream via `take_stream` once the channel
/// has reached [`ChannelState::Opened`].
#[async_trait]
pub trait TcpipClientChannel: Send + Sync {
    async fn open(&self) -> Result<(), ForwardError>;
    fn state(&self) -> ChannelState;
    /// Block until the channel reaches one of `states`, returning the one reached.
    async fn wait_for(&self, states: &[ChannelState]) -> ChannelState;
    async fn write_data(&self, bytes: &[u8]) -> Result<(), ForwardError>;
    async fn close(&self, force: bool) -> Result<(), ForwardError>;
    /// Take the duplex byte stream backing this channel. Only valid once
    /// the channel has reached [`ChannelState::Opened`]; returns
    /// `IllegalState` if called twice. Used by the SOCKS engine, which owns
    /// both ends of the connection directly via `copy_bidirectional` and so
    /// never calls `attach_output`.
    async fn take_stream(&self) -> Result<Box<dyn RawDuplex>, ForwardError>;

    /// Wire this channel's incoming SSH data directly to `sink`, the local
    /// TCP session it is bridging for. Spawns whatever task is needed to
    /// pump bytes for the lifetime of the channel; `write_data` remains
    /// usable afterward for the opposite direction. This is the static
    /// bridge's analogue of the channel layer's internal output-stream
    /// attachment (out of scope per spec.md §1) for channel implementations
    /// this crate owns end-to-end.
    async fn attach_output(&self, sink: Arc<dyn IoSession>) -> Result<(), ForwardError>;
}

/// Marker for a duplex byte stream backing an accepted or forwarded connection.
pub trait RawDuplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> RawDuplex for T {}

/// The SSH session: global requests and channel construction.
///
/// `request` implements the two global requests the facade needs
/// (`tcpip-forward`, `cancel-tcpip-forward`); `name` is the SSH request name
/// and `payload` is the already wire-encoded request-specific data from
/// [`super::wire`]. A `want_reply` of `true` is implied — the facade always
/// waits for confirmation, per the port-forwarding protocol's reliance on
/// the bound port coming back in the reply.
#[async_trait]
pub trait Session: Send + Sync {
    async fn request(
        &self,
        name: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, ForwardError>;

    /// Send a global request with `wantReply=false`, not waiting for any
    /// acknowledgement. Used for `cancel-tcpip-forward`, which spec.md has
    /// go out via `writePacket` rather than the synchronous `request` path.
    async fn write_packet(&self, payload: Vec<u8>) -> Result<(), ForwardError>;

    /// Open a `direct-tcpip` channel toward `target`, used by local and
    /// dynamic (SOCKS) forwarding.
    async fn open_direct_tcpip(
        &self,
        target: &SocketEndpoint,
    ) -> Result<Box<dyn TcpipClientChannel>, ForwardError>;

    /// Open a `forwarded-tcpip` channel back to the peer for a connection
    /// accepted on `bound` (a port this side bound on the peer's behalf via
    /// `tcpip-forward`), naming `originator` as the accepted TCP peer.
    async fn create_forwarded_tcpip_channel(
        &self,
        bound: &SocketEndpoint,
        originator: &SocketEndpoint,
    ) -> Result<Box<dyn TcpipClientChannel>, ForwardError>;
}

/// Registration of channels with the session's connection-service layer.
/// Kept as a narrow seam distinct from [`Session`] because ownership of the
/// channel map conceptually belongs to the connection service, not the
/// session handle itself (mirrors how an SSH session delegates channel
/// bookkeeping to its connection service).
#[async_trait]
pub trait ConnectionService: Send + Sync {
    async fn register_channel(&self, channel_id: u32);
    async fn unregister_channel(&self, channel_id: u32);
}

/// No-op `ConnectionService` used when nothing needs to observe channel
/// registration. Matches [`PermitAllFilter`]'s role as the default for an
/// optional collaborator.
pub struct NullConnectionService;

#[async_trait]
impl ConnectionService for NullConnectionService {
    async fn register_channel(&self, _channel_id: u32) {}
    async fn unregister_channel(&self, _channel_id: u32) {}
}

/// A bound local listener, reported back to the acceptor adapter once bind
/// succeeds so `do_bind` can resolve the OS-assigned address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundAddress(pub SocketAddr);

/// Accepts inbound TCP connections on behalf of the forwarder and dispatches
/// them to an [`IoHandler`]. One acceptor instance is shared across every
/// local and dynamic binding the forwarder owns.
#[async_trait]
pub trait IoAcceptor: Send + Sync {
    /// Bind an additional listener at `address`and start routing its
    /// accepted connections to `handler`. Returns the resolved bound
    /// address (meaningful when `address`'s port is 0).
    async fn bind(
        &self,
        address: SocketAddr,
        handler: std::sync::Arc<dyn IoHandler>,
    ) -> Result<SocketAddr, ForwardError>;

    /// Stop listening on `address`. A no-op if nothing is bound there.
    async fn unbind(&self, address: SocketAddr);

    /// Addresses currently bound, used by [`super::facade`]'s `do_bind` to
    /// resolve a fresh bind via before/after set difference.
    async fn bound_addresses(&self) -> Vec<SocketAddr>;

    /// Force-close every bound listener and any sessions it has accepted.
    async fn close(&self);
}

/// Produces [`IoAcceptor`] instances. Single-implementation seam kept
/// distinct from `IoAcceptor` itself so the facade can be tested against an
/// in-memory acceptor without touching real sockets.
pub trait IoServiceFactory: Send + Sync {
    fn create_acceptor(&self) -> std::sync::Arc<dyn IoAcceptor>;
}

/// Handle to one accepted connection, as delivered to an [`IoHandler`].
#[async_trait]
pub trait IoSession: Send + Sync {
    /// The local address the peer connected to (identifies which binding
    /// this session belongs to).
    fn local_address(&self) -> SocketAddr;

    /// The address of the TCP peer that connected, used as the originator
    /// when opening a `forwarded-tcpip` channel.
    fn peer_address(&self) -> SocketAddr;

    async fn write(&self, bytes: &[u8]) -> Result<(), ForwardError>;

    async fn close(&self);

    /// Detach the raw duplex stream from the push-based callback flow and
    /// hand full ownership to the caller. Used by the SOCKS engine, which
    /// must read the handshake itself rather than receive it piecemeal
    /// through `message_received`. After this call the session no longer
    /// invokes `message_received`/`session_closed` for this connection.
    async fn take_raw(&self) -> Result<Box<dyn RawDuplex>, ForwardError>;
}

/// Push-based callbacks for an accepted connection, implemented once by
/// [`super::bridge::BridgeHandler`] and shared by every binding.
#[async_trait]
pub trait IoHandler: Send + Sync {
    async fn session_created(&self, session: std::sync::Arc<dyn IoSession>);
    async fn message_received(&self, session: std::sync::Arc<dyn IoSession>, data: Vec<u8>);
    async fn session_closed(&self, session: std::sync::Arc<dyn IoSession>);
    async fn exception_caught(&self, session: std::sync::Arc<dyn IoSession>, error: ForwardError);
}

/// Allows a caller to veto binding/forwarding of a given endpoint before any
/// socket or SSH request is made.
pub trait ForwardingFilter: Send + Sync {
    fn can_listen(&self, local: &SocketEndpoint) -> bool;
}

/// Default filter: everything is allowed. Matches spec behavior when no
/// filter is configured.
pub struct PermitAllFilter;
impl ForwardingFilter for PermitAllFilter {
    fn can_listen(&self, _local: &SocketEndpoint) -> bool {
        true
    }
}
