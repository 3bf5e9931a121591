//! Seam between the hub and the real duplex transport.
//!
//! The deployed transport is a websocket management API owned by the
//! surrounding infrastructure; the hub only needs "send this text to that
//! connection". Tests plug in an in-memory double with failure injection.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote end closed or the connection id no longer resolves.
    /// Triggers registry eviction.
    #[error("connection {0} is gone")]
    Gone(String),
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// One-way delivery to a single connected client.
#[async_trait]
pub trait ClientChannel: Send + Sync {
    async fn send(&self, connection_id: &str, payload: &str) -> Result<(), TransportError>;
}
