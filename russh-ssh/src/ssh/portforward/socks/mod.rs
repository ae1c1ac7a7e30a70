//! SOCKS5 (RFC 1928) support for dynamic port forwarding.
//!
//! `codec` is pure parsing/encoding; `engine` owns a detached connection and
//! drives the codec against it plus the bridged SSH channel.

pub mod codec;
pub mod engine;
