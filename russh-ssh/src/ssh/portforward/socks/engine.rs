//! Drives one SOCKS5 connection end-to-end once a [`BridgeHandler`] has
//! detached it from the push-based acceptor via `IoSession::take_raw`.
//!
//! [`BridgeHandler`]: super::super::bridge::BridgeHandler

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::ForwardError;
use super::super::endpoint::SocketEndpoint;
use super::super::traits::{RawDuplex, Session};
use super::codec::{self, AddressKind, ConnectRequest, SocksAddress};

/// Read the handshake, negotiate the target, bridge bytes. Returns once the
/// connection closes in either direction or negotiation fails; errors from
/// negotiation are reported to the peer with the appropriate SOCKS5 reply
/// before being returned.
pub async fn run(
    mut stream: Box<dyn RawDuplex>,
    session: Arc<dyn Session>,
) -> Result<(), ForwardError> {
    let request = match negotiate(&mut stream).await {
        Ok(request) => request,
        Err(e) => return Err(e),
    };

    let target = SocketEndpoint::new(request.address.host_string(), request.port);
    tracing::debug!("SOCKS5 CONNECT to {}", target);

    let channel = match session.open_direct_tcpip(&target).await {
        Ok(channel) => channel,
        Err(e) => {
            stream
                .write_all(&codec::encode_reply(codec::REPLY_CONNECTION_REFUSED))
                .await?;
            return Err(e);
        }
    };

    channel.open().await?;
    channel.wait_for(&[
        crate::ssh::portforward::traits::ChannelState::Opened,
        crate::ssh::portforward::traits::ChannelState::Closed,
    ]).await;

    let mut channel_stream = channel.take_stream().await?;

    stream
        .write_all(&codec::encode_reply(codec::REPLY_SUCCESS))
        .await?;

    match tokio::io::copy_bidirectional(&mut stream, &mut channel_stream).await {
        Ok((sent, received)) => {
            tracing::debug!(
                "SOCKS5 connection to {} closed, sent {} received {}",
                target,
                sent,
                received
            );
        }
        Err(e) => {
            tracing::debug!("SOCKS5 bridge to {} ended: {}", target, e);
        }
    }

    Ok(())
}

async fn negotiate(stream: &mut Box<dyn RawDuplex>) -> Result<ConnectRequest, ForwardError> {
    let mut greeting_header = [0u8; 2];
    stream.read_exact(&mut greeting_header).await?;
    let nmethods = greeting_header[1] as usize;
    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;

    let accepted = codec::parse_greeting(greeting_header[0], &methods)?;
    stream
        .write_all(&codec::encode_method_selection(accepted))
        .await?;
    if !accepted {
        return Err(ForwardError::RequestDenied {
            name: "socks-auth".into(),
            reason: "no acceptable SOCKS authentication method offered".into(),
        });
    }

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let atyp = match codec::parse_connect_header(header) {
        Ok(atyp) => atyp,
        Err(e) => {
            stream
                .write_all(&codec::encode_reply(codec::REPLY_COMMAND_NOT_SUPPORTED))
                .await?;
            return Err(e);
        }
    };

    let address = match codec::decode_address_kind(atyp) {
        Some(AddressKind::Ipv4) => {
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await?;
            SocksAddress::Ipv4(buf)
        }
        Some(AddressKind::Domain) => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await?;
            SocksAddress::Domain(String::from_utf8_lossy(&domain).into_owned())
        }
        Some(AddressKind::Ipv6) => {
            let mut buf = [0u8; 16];
            stream.read_exact(&mut buf).await?;
            SocksAddress::Ipv6(buf)
        }
        None => {
            stream
                .write_all(&codec::encode_reply(codec::REPLY_ADDRESS_TYPE_NOT_SUPPORTED))
                .await?;
            return Err(ForwardError::InvalidArgument(format!(
                "unsupported SOCKS address type {atyp:#x}"
            )));
        }
    };

    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);

    Ok(ConnectRequest { address, port })
}
