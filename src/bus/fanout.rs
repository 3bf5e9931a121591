use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::protocol::OutboundMessage;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::transport::ClientChannel;
use crate::HubError;

/// Outcome of one fan-out round.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: Vec<ConnectionId>,
    pub evicted: Vec<ConnectionId>,
}

/// Delivers outbound messages to every live connection.
///
/// Each round sends to all recipients concurrently; a failure on one channel
/// evicts that connection from the registry and never aborts the others.
/// Rounds are serialized on the `delivery` lock, which is what gives each
/// individual connection FIFO delivery and what orders direct snapshot sends
/// against broadcast rounds.
pub struct FanoutPublisher {
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn ClientChannel>,
    delivery: Mutex<()>,
}

impl FanoutPublisher {
    pub fn new(registry: Arc<ConnectionRegistry>, transport: Arc<dyn ClientChannel>) -> Self {
        Self {
            registry,
            transport,
            delivery: Mutex::new(()),
        }
    }

    /// Spawn the background loop draining `rx` and fanning each update out.
    pub fn start(self: Arc<Self>, mut rx: broadcast::Receiver<OutboundMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => match self.broadcast(&message).await {
                        Ok(report) if !report.evicted.is_empty() => {
                            tracing::info!(
                                evicted = report.evicted.len(),
                                delivered = report.delivered.len(),
                                "evicted stale connections during fan-out"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("fan-out round failed: {e}"),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("fan-out loop lagged, dropped {n} updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Deliver `message` to every live connection. Failed recipients are
    /// collected and unregistered; the rest are unaffected.
    pub async fn broadcast(&self, message: &OutboundMessage) -> Result<DeliveryReport, HubError> {
        let payload = serde_json::to_string(message)?;
        let _round = self.delivery.lock().await;
        let ids = self.registry.list_live();

        let attempts = ids.into_iter().map(|id| {
            let payload = &payload;
            async move {
                let result = self.transport.send(&id, payload).await;
                (id, result)
            }
        });

        let mut report = DeliveryReport::default();
        for (id, result) in join_all(attempts).await {
            match result {
                Ok(()) => report.delivered.push(id),
                Err(err) => {
                    tracing::warn!(connection_id = %id, %err, "delivery failed, evicting connection");
                    if let Err(db_err) = self.registry.unregister(&id) {
                        tracing::warn!(connection_id = %id, %db_err, "failed to evict connection");
                    }
                    report.evicted.push(id);
                }
            }
        }
        Ok(report)
    }

    /// Read a message under the delivery lock and send it to a single
    /// connection, evicting it on failure. Used by the snapshot responder;
    /// snapshots are never broadcast.
    ///
    /// Holding the lock across read-plus-send orders the payload against
    /// broadcast rounds: a mutation racing this call is either visible to
    /// `message()` or its broadcast is delivered after the send, so a stale
    /// read can never overtake the update that supersedes it.
    pub async fn send_current<F>(&self, connection_id: &str, message: F) -> Result<(), HubError>
    where
        F: FnOnce() -> OutboundMessage,
    {
        let _round = self.delivery.lock().await;
        let payload = serde_json::to_string(&message())?;
        if let Err(err) = self.transport.send(connection_id, &payload).await {
            tracing::warn!(connection_id, %err, "direct delivery failed, evicting connection");
            self.registry.unregister(connection_id)?;
            return Err(HubError::Transport(err));
        }
        Ok(())
    }
}
