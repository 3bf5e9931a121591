//! Live-connection registry.
//!
//! Tracks which dashboard connections are currently eligible for fan-out.
//! The in-memory map answers `list_live` without touching the database; the
//! `connections` table mirrors it so a restarted process can resume pushing
//! to connections that outlived it. Rows for connections that died with the
//! process are cleaned up lazily by failed-delivery eviction.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use crate::db::{queries, Database, DbError};

pub type ConnectionId = String;

pub struct ConnectionRegistry {
    db: Arc<Database>,
    live: DashMap<ConnectionId, i64>,
}

impl ConnectionRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            live: DashMap::new(),
        }
    }

    /// Register a newly opened connection. Idempotent: re-registering a live
    /// id keeps the original connect time and is otherwise silent.
    pub fn register(&self, connection_id: &str) -> Result<(), DbError> {
        if self.live.contains_key(connection_id) {
            tracing::debug!(connection_id, "connection already registered");
            return Ok(());
        }

        let established_at = Utc::now().timestamp_millis();
        queries::insert_connection(
            &self.db,
            &queries::ConnectionRow {
                connection_id: connection_id.to_string(),
                established_at,
            },
        )?;
        self.live.insert(connection_id.to_string(), established_at);
        tracing::info!(connection_id, "connection registered");
        Ok(())
    }

    /// Remove a connection. No-op when the id is absent.
    pub fn unregister(&self, connection_id: &str) -> Result<(), DbError> {
        if self.live.remove(connection_id).is_some() {
            tracing::info!(connection_id, "connection unregistered");
        }
        queries::delete_connection(&self.db, connection_id)
    }

    /// Snapshot of live connection ids, ordered by connect time. Consistent
    /// at call time only; concurrent churn after return is expected.
    pub fn list_live(&self) -> Vec<ConnectionId> {
        let mut entries: Vec<(ConnectionId, i64)> = self
            .live
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries.into_iter().map(|(id, _)| id).collect()
    }

    pub fn is_live(&self, connection_id: &str) -> bool {
        self.live.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Rehydrate the live map from the durable mirror after a restart.
    /// Connections whose channels did not survive are evicted on their first
    /// failed delivery, so restoring optimistically is safe.
    pub fn restore_persisted(&self) -> Result<usize, DbError> {
        let rows = queries::list_connections(&self.db)?;
        let restored = rows.len();
        for row in rows {
            self.live.insert(row.connection_id, row.established_at);
        }
        Ok(restored)
    }
}
