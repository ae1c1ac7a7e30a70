//! Property-based tests for the port-forwarding wire format and SOCKS5
//! codec, run against the crate's public API rather than internals.

use proptest::prelude::*;
use russh_ssh::ssh::portforward::socks::codec::{self, SocksAddress};
use russh_ssh::ssh::portforward::wire;

proptest! {
    #[test]
    fn tcpip_forward_reply_roundtrips_any_assigned_port(port in any::<u16>()) {
        let payload = (port as u32).to_be_bytes().to_vec();
        prop_assert_eq!(wire::decode_tcpip_forward_reply(&payload).unwrap(), Some(port));
    }

    #[test]
    fn tcpip_forward_request_encodes_address_length_prefix(
        host in "[a-zA-Z0-9.-]{0,64}",
        port in any::<u16>(),
    ) {
        let encoded = wire::encode_tcpip_forward_request(&host, port);
        // 4-byte length prefix + address bytes + 4-byte port
        prop_assert_eq!(encoded.len(), 4 + host.len() + 4);
        prop_assert_eq!(&encoded[..4], &(host.len() as u32).to_be_bytes());
        prop_assert_eq!(&encoded[encoded.len() - 4..], &(port as u32).to_be_bytes());
    }

    #[test]
    fn forwarded_tcpip_open_roundtrips(
        bound_address in "[a-zA-Z0-9.-]{0,32}",
        bound_port in any::<u16>(),
        originator_address in "[a-zA-Z0-9.-]{0,32}",
        originator_port in any::<u16>(),
    ) {
        let payload = wire::encode_forwarded_tcpip_open(&bound_address, bound_port, &originator_address, originator_port);
        let decoded = wire::decode_forwarded_tcpip_open(&payload).unwrap();
        prop_assert_eq!(decoded, (bound_address, bound_port, originator_address, originator_port));
    }

    #[test]
    fn decode_forwarded_tcpip_open_never_panics_on_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        // Truncated/malformed input must error, never panic.
        let _ = wire::decode_forwarded_tcpip_open(&bytes);
    }

    #[test]
    fn socks_greeting_accepts_iff_no_auth_present(methods in proptest::collection::vec(any::<u8>(), 0..16)) {
        let result = codec::parse_greeting(codec::VERSION, &methods);
        prop_assert_eq!(result.unwrap(), methods.contains(&0x00));
    }

    #[test]
    fn socks_greeting_rejects_any_non_v5_version(version in any::<u8>().prop_filter("not v5", |v| *v != codec::VERSION)) {
        prop_assert!(codec::parse_greeting(version, &[0x00]).is_err());
    }

    #[test]
    fn socks_ipv4_host_string_is_dotted_quad(a in any::<u8>(), b in any::<u8>(), c in any::<u8>(), d in any::<u8>()) {
        let addr = SocksAddress::Ipv4([a, b, c, d]);
        prop_assert_eq!(addr.host_string(), format!("{a}.{b}.{c}.{d}"));
    }
}
