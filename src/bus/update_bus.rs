use tokio::sync::broadcast;

use crate::protocol::OutboundMessage;

const BUS_CAPACITY: usize = 1024;

/// In-memory broadcast channel carrying outbound dashboard messages.
///
/// Publishing is synchronous and never waits on delivery; the fan-out loop
/// (and any other subscriber) drains its own receiver at its own pace.
pub struct UpdateBus {
    tx: broadcast::Sender<OutboundMessage>,
}

impl UpdateBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an update onto the bus.
    pub fn publish(&self, message: OutboundMessage) {
        if let Err(e) = self.tx.send(message) {
            tracing::warn!("update bus publish failed (no receivers?): {e}");
        }
    }

    /// Get a new receiver for this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.tx.subscribe()
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new()
    }
}
