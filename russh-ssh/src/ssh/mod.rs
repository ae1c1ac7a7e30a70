//! SSH Client Module
//!
//! This module provides the SSH client functionality, including:
//! - Connection management
//! - Authentication (Password, Public Key, Agent)
//! - Command execution
//! - Interactive shell
//! - Port forwarding
//!
//! # Requirements Coverage
//! - Requirement 1: Async SSH Connection Management
//! - Requirement 9: Command Execution
//! - Requirement 10: Port Forwarding

pub mod client;
pub mod command;
pub mod portforward;

pub use client::SshClient;
pub use command::CommandResult;
pub use portforward::{ForwardRecord, ForwardingMode, Forwarder, PortForwardSpec, PortForwardingConfig, SocketEndpoint};

use std::path::PathBuf;
use std::time::Duration;

/// SSH session configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote host address
    pub host: String,
    /// Remote port (default: 22)
    pub port: u16,
    /// Username for authentication
    pub username: String,
    /// Authentication method
    pub auth: AuthMethod,
    /// Connection timeout
    pub timeout: Duration,
    /// Host key verification policy
    pub host_key_check: HostKeyCheck,
    /// Path to a known_hosts file, consulted when `host_key_check` requires one
    pub known_hosts_path: Option<PathBuf>,
}

/// Host key verification policy for a connection.
#[derive(Debug, Clone, Default)]
pub enum HostKeyCheck {
    /// Require the host key to match an entry in `known_hosts_path`.
    Strict,
    /// Accept and (where supported) record keys not yet in `known_hosts_path`.
    AcceptNew,
    /// Perform no host key verification at all.
    #[default]
    None,
}

/// SSH authentication method
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Password authentication
    Password(String),
    /// Public key authentication
    PublicKey {
        /// Path to private key file
        key_path: PathBuf,
        /// Optional passphrase for encrypted keys
        passphrase: Option<String>,
    },
    /// SSH Agent authentication
    Agent,
}
