//! Per-deployment aggregate state: running counters, the job-status
//! histogram, and the bounded recent-event log.
//!
//! One [`AggregateStore`] exists per deployment. Every mutation is a single
//! read-modify-write under one lock and is persisted before the lock is
//! released, so concurrent producers never lose updates and the state
//! survives process restarts.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::{queries, Database, DbError};
use crate::protocol::{LogEvent, StatusCounts, StatusKind};

/// Bound on the recent-event log, matching what the dashboard displays.
pub const RECENT_EVENTS_LIMIT: usize = 10;

/// Snapshot of everything the dashboard aggregates for one deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateState {
    pub total_vectors: u64,
    pub total_documents: u64,
    pub vectors_written: u64,
    pub documents_ingested: u64,
    pub job_status_counts: StatusCounts,
    pub recent_events: Vec<LogEvent>,
    pub source_destination_embedding: String,
}

impl AggregateState {
    /// Package this state as the full snapshot message sent to a single
    /// connection on `initialCheck`.
    pub fn to_snapshot(&self) -> crate::protocol::SnapshotResponse {
        crate::protocol::SnapshotResponse {
            message_type: crate::protocol::SNAPSHOT_MESSAGE_TYPE.to_string(),
            logs: self.recent_events.clone(),
            job_status_counts: self.job_status_counts,
            total_vectors: self.total_vectors,
            total_documents: self.total_documents,
            vectors_written: self.vectors_written,
            documents_ingested: self.documents_ingested,
            source_arn: self.source_destination_embedding.clone(),
        }
    }
}

/// Which counter an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    TotalVectors,
    TotalDocuments,
    VectorsWritten,
    DocumentsIngested,
}

/// The two counter update modes, kept distinct on purpose: an authoritative
/// read from the destination store may supersede (even lower) a stale value,
/// while a delta only ever increments. Neither is inferred from the other.
#[derive(Debug, Clone, Copy)]
pub enum CounterUpdate {
    Authoritative { field: CounterField, value: u64 },
    Delta { field: CounterField, amount: u64 },
}

/// Durable, mutex-guarded aggregate state for one deployment.
pub struct AggregateStore {
    db: Arc<Database>,
    deployment_id: String,
    state: Mutex<AggregateState>,
}

impl AggregateStore {
    /// Load the deployment's persisted state, or start zeroed when nothing
    /// was ever recorded.
    pub fn open(db: Arc<Database>, deployment_id: impl Into<String>) -> Result<Self, DbError> {
        let deployment_id = deployment_id.into();
        let state = match queries::get_aggregate_state(&db, &deployment_id)? {
            Some(row) => state_from_row(&row)?,
            None => AggregateState::default(),
        };
        Ok(Self {
            db,
            deployment_id,
            state: Mutex::new(state),
        })
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Fold a batch of classified events into the recent-event log.
    /// Idempotent: re-applying the same batch leaves the log unchanged.
    pub fn apply_events(&self, batch: &[LogEvent]) -> Result<AggregateState, DbError> {
        self.mutate(|state| {
            state.recent_events = merge_recent(&state.recent_events, batch);
        })
    }

    pub fn apply_counter_update(&self, update: CounterUpdate) -> Result<AggregateState, DbError> {
        self.mutate(|state| match update {
            CounterUpdate::Authoritative { field, value } => {
                *counter_mut(state, field) = value;
            }
            CounterUpdate::Delta { field, amount } => {
                let counter = counter_mut(state, field);
                *counter = counter.saturating_add(amount);
            }
        })
    }

    /// Count one observed job state transition. This is a cumulative
    /// histogram of transitions seen, not a gauge of jobs currently in each
    /// state.
    pub fn apply_status_transition(&self, status: StatusKind) -> Result<AggregateState, DbError> {
        self.mutate(|state| state.job_status_counts.bump(status))
    }

    /// Set the source|destination|embedding descriptor. First write wins;
    /// later attempts with a different value are logged and ignored.
    pub fn set_descriptor(&self, descriptor: &str) -> Result<AggregateState, DbError> {
        self.mutate(|state| {
            if state.source_destination_embedding.is_empty() {
                state.source_destination_embedding = descriptor.to_string();
            } else if state.source_destination_embedding != descriptor {
                tracing::warn!(
                    current = %state.source_destination_embedding,
                    rejected = %descriptor,
                    "deployment descriptor is immutable once set"
                );
            }
        })
    }

    /// Read-only copy of the current state. A deployment with no recorded
    /// events yields the zeroed default.
    pub fn snapshot(&self) -> AggregateState {
        self.state.lock().expect("aggregate mutex poisoned").clone()
    }

    // Mutations hold the state lock across the persist call, so the in-memory
    // view and the durable row never diverge between two racing producers.
    fn mutate(
        &self,
        apply: impl FnOnce(&mut AggregateState),
    ) -> Result<AggregateState, DbError> {
        let mut state = self.state.lock().expect("aggregate mutex poisoned");
        apply(&mut state);
        self.persist(&state)?;
        Ok(state.clone())
    }

    fn persist(&self, state: &AggregateState) -> Result<(), DbError> {
        let row = queries::AggregateStateRow {
            deployment_id: self.deployment_id.clone(),
            total_vectors: state.total_vectors as i64,
            total_documents: state.total_documents as i64,
            vectors_written: state.vectors_written as i64,
            documents_ingested: state.documents_ingested as i64,
            job_status_counts_json: serde_json::to_string(&state.job_status_counts)
                .map_err(|e| DbError::Corrupt(e.to_string()))?,
            recent_events_json: serde_json::to_string(&state.recent_events)
                .map_err(|e| DbError::Corrupt(e.to_string()))?,
            source_destination_embedding: state.source_destination_embedding.clone(),
            updated_at: Utc::now().to_rfc3339(),
        };
        queries::upsert_aggregate_state(&self.db, &row)
    }
}

fn counter_mut(state: &mut AggregateState, field: CounterField) -> &mut u64 {
    match field {
        CounterField::TotalVectors => &mut state.total_vectors,
        CounterField::TotalDocuments => &mut state.total_documents,
        CounterField::VectorsWritten => &mut state.vectors_written,
        CounterField::DocumentsIngested => &mut state.documents_ingested,
    }
}

fn state_from_row(row: &queries::AggregateStateRow) -> Result<AggregateState, DbError> {
    Ok(AggregateState {
        total_vectors: row.total_vectors.max(0) as u64,
        total_documents: row.total_documents.max(0) as u64,
        vectors_written: row.vectors_written.max(0) as u64,
        documents_ingested: row.documents_ingested.max(0) as u64,
        job_status_counts: serde_json::from_str(&row.job_status_counts_json)
            .map_err(|e| DbError::Corrupt(format!("job_status_counts: {e}")))?,
        recent_events: serde_json::from_str(&row.recent_events_json)
            .map_err(|e| DbError::Corrupt(format!("recent_events: {e}")))?,
        source_destination_embedding: row.source_destination_embedding.clone(),
    })
}

/// Merge-and-trim for the recent-event log: union of `existing` and `batch`,
/// deduplicated by exact (timestamp, message) with the incoming batch winning
/// ties, sorted newest first, truncated to [`RECENT_EVENTS_LIMIT`].
///
/// The secondary sort on message makes the result deterministic for equal
/// timestamps, which is what makes batch splitting order-insensitive.
pub fn merge_recent(existing: &[LogEvent], batch: &[LogEvent]) -> Vec<LogEvent> {
    let mut merged: Vec<LogEvent> = existing
        .iter()
        .filter(|event| !batch.iter().any(|incoming| same_key(incoming, event)))
        .cloned()
        .collect();

    for (idx, event) in batch.iter().enumerate() {
        let superseded_later = batch[idx + 1..].iter().any(|later| same_key(later, event));
        if !superseded_later {
            merged.push(event.clone());
        }
    }

    merged.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.message.cmp(&a.message))
    });
    merged.truncate(RECENT_EVENTS_LIMIT);
    merged
}

fn same_key(a: &LogEvent, b: &LogEvent) -> bool {
    a.timestamp == b.timestamp && a.message == b.message
}
