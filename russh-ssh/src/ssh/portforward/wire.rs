//! Byte-level encoding for the `tcpip-forward` and `cancel-tcpip-forward`
//! SSH global request payloads (RFC 4254 §7).
//!
//! Both requests share the same payload shape: a length-prefixed
//! "address to bind" string followed by a 32-bit port number. The reply to
//! `tcpip-forward` is a single 32-bit port number, present only when the
//! requested port was `0` and the server assigned one.

use crate::error::ForwardError;

fn encode_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn read_u32(buf: &[u8], offset: usize, context: &str) -> Result<u32, ForwardError> {
    buf.get(offset..offset + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| ForwardError::IoFailure {
            operation: context.to_string(),
            reason: "truncated uint32 field".into(),
        })
}

fn decode_string(buf: &[u8], offset: &mut usize) -> Result<String, ForwardError> {
    if buf.len() < *offset + 4 {
        return Err(ForwardError::IoFailure {
            operation: "decode tcpip-forward reply".into(),
            reason: "truncated length prefix".into(),
        });
    }
    let len = read_u32(buf, *offset, "decode tcpip-forward reply")? as usize;
    *offset += 4;
    if buf.len() < *offset + len {
        return Err(ForwardError::IoFailure {
            operation: "decode tcpip-forward reply".into(),
            reason: "truncated string body".into(),
        });
    }
    let s = String::from_utf8_lossy(&buf[*offset..*offset + len]).into_owned();
    *offset += len;
    Ok(s)
}

/// Encode the payload for a `tcpip-forward` or `cancel-tcpip-forward` global
/// request: `string address_to_bind` `uint32 port_to_bind`.
pub fn encode_tcpip_forward_request(address: &str, port: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + address.len() + 4);
    encode_string(&mut buf, address);
    buf.extend_from_slice(&(port as u32).to_be_bytes());
    buf
}

/// Decode the `tcpip-forward` reply: `uint32 bound_port`, present only when
/// the request asked to bind port 0. Returns `None` for a reply with no
/// payload (port was already specified and confirmed as-is).
pub fn decode_tcpip_forward_reply(payload: &[u8]) -> Result<Option<u16>, ForwardError> {
    if payload.is_empty() {
        return Ok(None);
    }
    if payload.len() < 4 {
        return Err(ForwardError::IoFailure {
            operation: "decode tcpip-forward reply".into(),
            reason: "reply shorter than one uint32".into(),
        });
    }
    let port = read_u32(payload, 0, "decode tcpip-forward reply")?;
    Ok(Some(port as u16))
}

/// Encode a `forwarded-tcpip` channel-open's type-specific data: the bound
/// address/port the connection arrived on, followed by the originator's
/// address/port.
pub fn encode_forwarded_tcpip_open(
    bound_address: &str,
    bound_port: u16,
    originator_address: &str,
    originator_port: u16,
) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_string(&mut buf, bound_address);
    buf.extend_from_slice(&(bound_port as u32).to_be_bytes());
    encode_string(&mut buf, originator_address);
    buf.extend_from_slice(&(originator_port as u32).to_be_bytes());
    buf
}

/// Decode a `forwarded-tcpip` channel-open's type-specific data: the bound
/// address/port the connection arrived on, followed by the originator's
/// address/port. Returns `(bound_address, bound_port, originator_address,
/// originator_port)`.
pub fn decode_forwarded_tcpip_open(
    payload: &[u8],
) -> Result<(String, u16, String, u16), ForwardError> {
    let mut offset = 0;
    let bound_address = decode_string(payload, &mut offset)?;
    if payload.len() < offset + 4 {
        return Err(ForwardError::IoFailure {
            operation: "decode forwarded-tcpip open".into(),
            reason: "truncated bound port".into(),
        });
    }
    let bound_port = read_u32(payload, offset, "decode forwarded-tcpip open")? as u16;
    offset += 4;
    let originator_address = decode_string(payload, &mut offset)?;
    if payload.len() < offset + 4 {
        return Err(ForwardError::IoFailure {
            operation: "decode forwarded-tcpip open".into(),
            reason: "truncated originator port".into(),
        });
    }
    let originator_port = read_u32(payload, offset, "decode forwarded-tcpip open")? as u16;
    Ok((bound_address, bound_port, originator_address, originator_port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_tcpip_forward_request() {
        let payload = encode_tcpip_forward_request("0.0.0.0", 8080);
        // string length (4) + "0.0.0.0" (7) + port (4)
        assert_eq!(payload.len(), 4 + 7 + 4);
    }

    #[test]
    fn decodes_assigned_port_reply() {
        let reply = 54321u32.to_be_bytes().to_vec();
        assert_eq!(decode_tcpip_forward_reply(&reply).unwrap(), Some(54321));
    }

    #[test]
    fn decodes_empty_reply_as_none() {
        assert_eq!(decode_tcpip_forward_reply(&[]).unwrap(), None);
    }
}
