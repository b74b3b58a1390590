//! OS-assigned loopback port allocation.

use std::net::Ipv4Addr;

use mira_wire::{BridgeError, Result};
use tokio::net::TcpListener;

/// Allocates free loopback ports by binding port 0 and reading back the
/// address the OS picked.
///
/// The listener is dropped before the sidecar binds the port, so another
/// process can grab it in the gap. The window is milliseconds wide and the
/// sidecar fails loudly on a bind conflict, which the supervisor turns into
/// a restart with a fresh port.
pub struct PortAllocator;

impl PortAllocator {
    pub async fn allocate() -> Result<u16> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| BridgeError::PortAllocation(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| BridgeError::PortAllocation(e.to_string()))?
            .port();
        drop(listener);
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_nonzero_ports() {
        let first = PortAllocator::allocate().await.unwrap();
        let second = PortAllocator::allocate().await.unwrap();
        assert_ne!(first, 0);
        assert_ne!(second, 0);
    }

    #[tokio::test]
    async fn allocated_port_is_bindable() {
        let port = PortAllocator::allocate().await.unwrap();
        let rebind = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await;
        assert!(rebind.is_ok());
    }
}
