//! Error types for the russh SSH library
//!
//! This module defines all error types used throughout the library,
//! ensuring descriptive error messages for all failure scenarios.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during connection operations
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection timed out
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// DNS resolution failed
    #[error("DNS resolution failed for host '{host}': {reason}")]
    DnsResolution { host: String, reason: String },

    /// Connection was refused by the remote host
    #[error("Connection refused by {host}:{port}")]
    ConnectionRefused { host: String, port: u16 },

    /// Network is unreachable
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// TLS handshake failed
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    /// Generic I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection was closed unexpectedly
    #[error("Connection closed unexpectedly: {0}")]
    ConnectionClosed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors that can occur during SSH operations
#[derive(Debug, Error)]
pub enum SshError {
    /// Authentication failed
    #[error("Authentication failed for user '{user}': {reason}")]
    AuthenticationFailed { user: String, reason: String },

    /// Host key verification failed
    #[error("Host key verification failed for {host}")]
    HostKeyVerification { host: String },

    /// Failed to open SSH channel
    #[error("Channel open failed: {0}")]
    ChannelOpen(String),

    /// Command execution failed
    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    /// Session is not connected
    #[error("Session not connected")]
    NotConnected,

    /// Command timed out
    #[error("Command timed out after {0:?}")]
    CommandTimeout(Duration),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

/// Errors that can occur during session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session not found
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Profile not found
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// Profile already exists
    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    /// SSH error
    #[error("SSH error: {0}")]
    Ssh(#[from] SshError),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors that can occur during port forwarding
#[derive(Debug, Error)]
pub enum ForwardError {
    /// A caller-supplied argument failed validation (bad port, empty host, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The forwarder (or the binding it targets) is not in a state that permits this operation
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Binding a local listener failed
    #[error("Failed to bind {address}: {reason}")]
    BindFailure { address: String, reason: String },

    /// A binding already exists for this local port
    #[error("Duplicate binding on port {port}")]
    DuplicateBinding { port: u16 },

    /// The peer denied a forwarding request (e.g. tcpip-forward global request)
    #[error("Request denied: {name}: {reason}")]
    RequestDenied { name: String, reason: String },

    /// A `ForwardingFilter` rejected the requested endpoint
    #[error("Forwarding filter rejected {0}")]
    FilterFailure(String),

    /// An I/O failure during an otherwise well-formed operation
    #[error("IO failure during {operation}: {reason}")]
    IoFailure { operation: String, reason: String },

    /// Forward not found
    #[error("Forward not found: {0}")]
    NotFound(String),

    /// Failed to open an SSH channel for the forward
    #[error("Channel open failed: {0}")]
    ChannelOpen(String),

    /// SSH error
    #[error("SSH error: {0}")]
    Ssh(#[from] SshError),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A primary failure with one or more secondary failures attached, recorded while
    /// unwinding a failed operation (e.g. a failed defensive `stop_*` during cleanup).
    #[error("{primary}{}", suppressed_suffix(suppressed))]
    Suppressed {
        primary: Box<ForwardError>,
        suppressed: Vec<ForwardError>,
    },
}

fn suppressed_suffix(suppressed: &[ForwardError]) -> String {
    if suppressed.is_empty() {
        String::new()
    } else {
        format!(
            " (suppressed: {})",
            suppressed
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        )
    }
}

impl ForwardError {
    /// Attach `secondary` as a suppressed error on `self`, collapsing nested
    /// `Suppressed` values so suppressed lists never nest.
    pub fn with_suppressed(self, secondary: ForwardError) -> ForwardError {
        match self {
            ForwardError::Suppressed {
                primary,
                mut suppressed,
            } => {
                suppressed.push(secondary);
                ForwardError::Suppressed { primary, suppressed }
            }
            primary => ForwardError::Suppressed {
                primary: Box::new(primary),
                suppressed: vec![secondary],
            },
        }
    }
}

impl ConnectionError {
    /// Check if this error has a descriptive message
    pub fn is_descriptive(&self) -> bool {
        !self.to_string().is_empty()
    }

    /// Get the error reason/description
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_is_descriptive() {
        let errors = vec![
            ConnectionError::Timeout(Duration::from_secs(30)),
            ConnectionError::DnsResolution {
                host: "example.com".to_string(),
                reason: "NXDOMAIN".to_string(),
            },
            ConnectionError::ConnectionRefused {
                host: "localhost".to_string(),
                port: 22,
            },
            ConnectionError::NetworkUnreachable("No route to host".to_string()),
            ConnectionError::TlsHandshake("Certificate expired".to_string()),
            ConnectionError::ConnectionClosed("Remote closed".to_string()),
            ConnectionError::InvalidConfig("Missing host".to_string()),
        ];

        for error in errors {
            assert!(error.is_descriptive(), "Error should be descriptive: {:?}", error);
            assert!(!error.reason().is_empty(), "Error reason should not be empty: {:?}", error);
        }
    }
}
