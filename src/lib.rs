//! Real-time job/event aggregation and dashboard fan-out for a
//! document-ingestion RAG pipeline.
//!
//! Two producer feeds (a filtered pipeline log stream and a batch-job
//! state-change stream) land on a single per-deployment aggregation point.
//! The hub classifies log lines, folds them into durable counters and a
//! bounded recent-event log, and pushes incremental state to every live
//! dashboard connection over a duplex channel. Reconnecting clients
//! bootstrap with a full snapshot.
//!
//! # Architecture
//!
//! - `classify`: pure log-line classification and count extraction
//! - `aggregate`: durable per-deployment counters and recent-event log
//! - `registry`: live connections, mirrored to SQLite
//! - `router`: the two inbound feeds, idempotency gating, counter updates
//! - `bus`: broadcast bus and fan-out publisher with per-recipient eviction
//! - `connection`: per-connection state machine and snapshot responder
//! - `db`: SQLite layer with migrations
//! - `hub`: wiring that owns the shared pieces

pub mod aggregate;
pub mod bus;
pub mod classify;
pub mod connection;
pub mod db;
pub mod hub;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod transport;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod tests;

pub use aggregate::{AggregateState, AggregateStore, CounterField, CounterUpdate};
pub use bus::{DeliveryReport, FanoutPublisher, UpdateBus};
pub use connection::{ClientConnection, ConnectionPhase};
pub use db::{Database, DbError};
pub use hub::PulseHub;
pub use registry::{ConnectionId, ConnectionRegistry};
pub use router::IngestRouter;
pub use transport::{ClientChannel, TransportError};

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("{0}")]
    Db(#[from] db::DbError),
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{0}")]
    Transport(#[from] transport::TransportError),
}

/// Install the default tracing subscriber. For binaries embedding the hub;
/// honors `RUST_LOG` when set.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vectorpulse=debug,info".parse().expect("valid env filter")),
        )
        .init();
}
