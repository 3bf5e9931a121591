//! Ingestion router: the single aggregation point both producer feeds land
//! on.
//!
//! The log feed and the job-event feed are independent transports with their
//! own retry/ack semantics; all the router guarantees is that each inbound
//! batch is applied to the aggregate store atomically and that the resulting
//! update is handed to the bus without waiting for delivery. A fan-out
//! failure never reverts a mutation that was already applied.

use std::sync::Arc;

use crate::aggregate::{AggregateState, AggregateStore, CounterField, CounterUpdate};
use crate::bus::UpdateBus;
use crate::classify;
use crate::db::{queries, Database};
use crate::protocol::{
    DestinationTotals, JobStateChange, LogEvent, OutboundMessage, RawLogLine, StateUpdate,
};
use crate::HubError;

/// How long a log line's idempotency key is retained. Redelivery on the log
/// feed happens within minutes; a day leaves ample margin while keeping the
/// `ingested_lines` table bounded.
const INGESTED_KEY_RETENTION_HOURS: i64 = 24;

pub struct IngestRouter {
    db: Arc<Database>,
    store: Arc<AggregateStore>,
    bus: Arc<UpdateBus>,
}

impl IngestRouter {
    pub fn new(db: Arc<Database>, store: Arc<AggregateStore>, bus: Arc<UpdateBus>) -> Self {
        Self { db, store, bus }
    }

    /// Apply one batch from the filtered log feed.
    ///
    /// Every line is classified and recorded; lines that cannot be parsed
    /// for counts are still kept as events. Delta counters are gated on a
    /// per-line idempotency key, so an at-least-once transport redelivering
    /// the batch cannot double-count.
    pub fn handle_log_batch(&self, lines: &[RawLogLine]) -> Result<AggregateState, HubError> {
        if lines.is_empty() {
            return Ok(self.store.snapshot());
        }

        let events: Vec<LogEvent> = lines.iter().map(classify::to_event).collect();

        for line in lines {
            let key = format!("{}:{}", line.timestamp, line.message);
            if !queries::record_ingested_line(&self.db, &key)? {
                tracing::debug!(timestamp = line.timestamp, "redelivered line, skipping deltas");
                continue;
            }

            if let Some(count) = classify::extract_vector_delta(&line.message) {
                self.store.apply_counter_update(CounterUpdate::Delta {
                    field: CounterField::VectorsWritten,
                    amount: count,
                })?;
            }
            if classify::is_document_finished(&line.message) {
                self.store.apply_counter_update(CounterUpdate::Delta {
                    field: CounterField::DocumentsIngested,
                    amount: 1,
                })?;
            }
        }

        let state = self.store.apply_events(&events)?;
        tracing::debug!(batch = lines.len(), "applied log batch");

        let pruned = queries::prune_ingested_lines(&self.db, INGESTED_KEY_RETENTION_HOURS)?;
        if pruned > 0 {
            tracing::debug!(pruned, "expired idempotency keys removed");
        }

        self.bus.publish(OutboundMessage::Update(StateUpdate {
            logs: Some(state.recent_events.clone()),
            vectors_written: Some(state.vectors_written),
            documents_ingested: Some(state.documents_ingested),
            ..Default::default()
        }));
        Ok(state)
    }

    /// Apply one transition from the job-event feed and push the refreshed
    /// histogram.
    pub fn handle_job_event(&self, change: &JobStateChange) -> Result<AggregateState, HubError> {
        let state = self.store.apply_status_transition(change.status)?;
        tracing::debug!(job_id = %change.job_id, status = ?change.status, "job state transition");

        self.bus.publish(OutboundMessage::Update(StateUpdate {
            job_status_counts: Some(state.job_status_counts),
            ..Default::default()
        }));
        Ok(state)
    }

    /// Resync totals from an authoritative destination-store read. These set
    /// the counters outright and may supersede a stale value in either
    /// direction.
    pub fn handle_authoritative_counts(
        &self,
        totals: DestinationTotals,
    ) -> Result<AggregateState, HubError> {
        self.store.apply_counter_update(CounterUpdate::Authoritative {
            field: CounterField::TotalVectors,
            value: totals.total_vectors,
        })?;
        let state = self.store.apply_counter_update(CounterUpdate::Authoritative {
            field: CounterField::TotalDocuments,
            value: totals.total_documents,
        })?;

        self.bus.publish(OutboundMessage::Update(StateUpdate {
            total_vectors: Some(state.total_vectors),
            total_documents: Some(state.total_documents),
            ..Default::default()
        }));
        Ok(state)
    }

    /// Record the deployment descriptor (set once) and announce it.
    pub fn handle_descriptor(&self, descriptor: &str) -> Result<AggregateState, HubError> {
        let state = self.store.set_descriptor(descriptor)?;

        self.bus.publish(OutboundMessage::Update(StateUpdate {
            source_destination_embedding: Some(state.source_destination_embedding.clone()),
            ..Default::default()
        }));
        Ok(state)
    }
}
