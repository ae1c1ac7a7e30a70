//! `do_bind`: resolves the OS-assigned address of a fresh bind by comparing
//! the acceptor's bound-address set before and after, since binding port 0
//! or a wildcard host doesn't otherwise reveal what the kernel picked.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::ForwardError;
use super::traits::{IoAcceptor, IoHandler};

pub async fn do_bind(
    acceptor: &dyn IoAcceptor,
    address: SocketAddr,
    handler: Arc<dyn IoHandler>,
) -> Result<SocketAddr, ForwardError> {
    let before: std::collections::HashSet<SocketAddr> =
        acceptor.bound_addresses().await.into_iter().collect();

    acceptor.bind(address, handler).await?;

    let after: std::collections::HashSet<SocketAddr> =
        acceptor.bound_addresses().await.into_iter().collect();
    let added: Vec<&SocketAddr> = after.difference(&before).collect();

    match added.as_slice() {
        [only] => Ok(**only),
        [] => Err(ForwardError::BindFailure {
            address: address.to_string(),
            reason: "no local addresses bound".into(),
        }),
        _ => Err(ForwardError::IllegalState(format!(
            "do_bind set-difference ambiguous: expected exactly one new address, got {}",
            added.len()
        ))),
    }
}
