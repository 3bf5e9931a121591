//! Per-connection lifecycle and message dispatch.
//!
//! Each duplex connection walks an explicit state machine instead of loose
//! open/message/close callbacks:
//!
//! ```text
//! Connecting --open()--> Open --close()/eviction--> Closed
//! ```
//!
//! While `Open`, inbound messages are dispatched by shape; the only defined
//! request is `initialCheck`, answered by the snapshot responder. `Closed`
//! is terminal; a client that reconnects gets a fresh `ClientConnection`
//! (connection-id reuse across time is allowed).

use std::sync::Arc;

use crate::aggregate::AggregateStore;
use crate::bus::FanoutPublisher;
use crate::protocol::{ClientRequest, OutboundMessage};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::HubError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Closed,
}

pub struct ClientConnection {
    id: ConnectionId,
    phase: ConnectionPhase,
    registry: Arc<ConnectionRegistry>,
    store: Arc<AggregateStore>,
    publisher: Arc<FanoutPublisher>,
}

impl ClientConnection {
    pub(crate) fn new(
        id: ConnectionId,
        registry: Arc<ConnectionRegistry>,
        store: Arc<AggregateStore>,
        publisher: Arc<FanoutPublisher>,
    ) -> Self {
        Self {
            id,
            phase: ConnectionPhase::Connecting,
            registry,
            store,
            publisher,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// `Connecting -> Open`: register with the fan-out tier. Incremental
    /// updates start reaching this connection from here on, before the
    /// snapshot is answered; see `respond_initial_check` for why that
    /// ordering is safe.
    pub fn open(&mut self) -> Result<(), HubError> {
        match self.phase {
            ConnectionPhase::Connecting => {
                self.registry.register(&self.id)?;
                self.phase = ConnectionPhase::Open;
                Ok(())
            }
            ConnectionPhase::Open => Ok(()),
            ConnectionPhase::Closed => {
                tracing::warn!(connection_id = %self.id, "cannot reopen a closed connection");
                Ok(())
            }
        }
    }

    /// Dispatch one inbound message by shape. Unknown or malformed requests
    /// are logged and dropped; they never fail the connection.
    pub async fn handle_message(&mut self, raw: &str) -> Result<(), HubError> {
        if self.phase != ConnectionPhase::Open {
            tracing::warn!(connection_id = %self.id, phase = ?self.phase, "message on non-open connection ignored");
            return Ok(());
        }

        match serde_json::from_str::<ClientRequest>(raw) {
            Ok(ClientRequest::InitialCheck { data }) => {
                tracing::debug!(connection_id = %self.id, ?data, "initial check requested");
                self.respond_initial_check().await
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.id, %e, "unrecognized client request dropped");
                Ok(())
            }
        }
    }

    /// Snapshot responder: answer `initialCheck` with the full current state,
    /// delivered to this connection only.
    ///
    /// Registration happened in `open()`, strictly before this point, and the
    /// publisher reads the snapshot under the same delivery lock that
    /// serializes broadcast rounds. A mutation racing the request is
    /// therefore either already in the snapshot or its broadcast reaches this
    /// (registered) connection after it; a stale snapshot can never arrive
    /// behind the update that supersedes it. No update in the bootstrap
    /// window is lost.
    async fn respond_initial_check(&mut self) -> Result<(), HubError> {
        let store = self.store.clone();
        match self
            .publisher
            .send_current(&self.id, || {
                OutboundMessage::Snapshot(store.snapshot().to_snapshot())
            })
            .await
        {
            Ok(()) => Ok(()),
            Err(HubError::Transport(err)) => {
                // The publisher already evicted us; finish the transition.
                tracing::warn!(connection_id = %self.id, %err, "snapshot delivery failed");
                self.phase = ConnectionPhase::Closed;
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// `-> Closed`: explicit close, transport error, or eviction. Idempotent.
    pub fn close(&mut self) -> Result<(), HubError> {
        if self.phase == ConnectionPhase::Closed {
            return Ok(());
        }
        self.registry.unregister(&self.id)?;
        self.phase = ConnectionPhase::Closed;
        Ok(())
    }
}
