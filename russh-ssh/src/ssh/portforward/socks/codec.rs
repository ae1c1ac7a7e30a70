//! Pure SOCKS5 (RFC 1928) parsing and reply encoding. No I/O here — the
//! engine in [`super::engine`] owns the connection and drives these
//! functions against buffered reads.

use crate::error::ForwardError;

/// Destination address as decoded from a SOCKS5 CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocksAddress {
    Ipv4([u8; 4]),
    Domain(String),
    Ipv6([u8; 16]),
}

impl SocksAddress {
    pub fn host_string(&self) -> String {
        match self {
            SocksAddress::Ipv4(a) => format!("{}.{}.{}.{}", a[0], a[1], a[2], a[3]),
            SocksAddress::Domain(d) => d.clone(),
            SocksAddress::Ipv6(a) => {
                let groups: Vec<String> = a
                    .chunks(2)
                    .map(|c| format!("{:x}", u16::from_be_bytes([c[0], c[1]])))
                    .collect();
                groups.join(":")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub address: SocksAddress,
    pub port: u16,
}

pub const VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

pub const REPLY_SUCCESS: u8 = 0x00;
pub const REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Parse the client greeting's method list, given the version/method-count
/// header byte 2 (`nmethods`) and the following `nmethods` bytes. Returns
/// `true` if "no authentication required" (0x00) is among them.
pub fn parse_greeting(version: u8, methods: &[u8]) -> Result<bool, ForwardError> {
    if version != VERSION {
        return Err(ForwardError::InvalidArgument(format!(
            "unsupported SOCKS version {version:#x}"
        )));
    }
    Ok(methods.contains(&0x00))
}

/// Encode the greeting reply: accepted method, or 0xFF if none acceptable.
pub fn encode_method_selection(accepted: bool) -> [u8; 2] {
    [VERSION, if accepted { 0x00 } else { 0xFF }]
}

/// Parse a CONNECT request's header (version, cmd, reserved, atyp) plus
/// whatever address bytes follow in `rest`. `rest` must contain at least the
/// address and trailing port; returns the request and the number of bytes of
/// `rest` consumed by the address (caller still needs to read the port
/// separately for the domain-name case, since its length is data-dependent).
pub fn parse_connect_header(header: [u8; 4]) -> Result<u8, ForwardError> {
    let (version, cmd, _reserved, atyp) = (header[0], header[1], header[2], header[3]);
    if version != VERSION {
        return Err(ForwardError::InvalidArgument(format!(
            "unsupported SOCKS version {version:#x} in request"
        )));
    }
    if cmd != CMD_CONNECT {
        return Err(ForwardError::InvalidArgument(format!(
            "unsupported SOCKS command {cmd:#x}"
        )));
    }
    Ok(atyp)
}

pub fn address_type_supported(atyp: u8) -> bool {
    matches!(atyp, ATYP_IPV4 | ATYP_DOMAIN | ATYP_IPV6)
}

pub fn decode_address_kind(atyp: u8) -> Option<AddressKind> {
    match atyp {
        ATYP_IPV4 => Some(AddressKind::Ipv4),
        ATYP_DOMAIN => Some(AddressKind::Domain),
        ATYP_IPV6 => Some(AddressKind::Ipv6),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AddressKind {
    Ipv4,
    Domain,
    Ipv6,
}

/// Encode a CONNECT reply. The bound-address fields are not meaningful to
/// most SOCKS clients in practice and are filled with the unspecified
/// IPv4 address/port, matching common SOCKS5 server behavior.
pub fn encode_reply(code: u8) -> [u8; 10] {
    [VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_accepts_no_auth() {
        assert!(parse_greeting(0x05, &[0x00, 0x01]).unwrap());
        assert!(!parse_greeting(0x05, &[0x02]).unwrap());
    }

    #[test]
    fn greeting_rejects_wrong_version() {
        assert!(parse_greeting(0x04, &[0x00]).is_err());
    }

    #[test]
    fn connect_header_rejects_non_connect_command() {
        let header = [0x05, 0x02, 0x00, ATYP_IPV4];
        assert!(parse_connect_header(header).is_err());
    }

    #[test]
    fn connect_header_accepts_connect() {
        let atyp = parse_connect_header([0x05, CMD_CONNECT, 0x00, ATYP_DOMAIN]).unwrap();
        assert_eq!(atyp, ATYP_DOMAIN);
    }

    #[test]
    fn ipv4_host_string_formats_dotted_quad() {
        let addr = SocksAddress::Ipv4([127, 0, 0, 1]);
        assert_eq!(addr.host_string(), "127.0.0.1");
    }
}
