//! Wire types shared between the aggregation hub and dashboard clients.
//!
//! Field names follow the dashboard's JSON contract (camelCase). Outbound
//! traffic is an explicit tagged union rather than free-form partial objects:
//! either a full snapshot (`initialCheckResponse`) or an incremental
//! [`StateUpdate`] whose absent fields leave client state untouched.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Inbound feed payloads
// ---------------------------------------------------------------------------

/// One pre-filtered line from the pipeline log feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLogLine {
    pub timestamp: i64,
    pub message: String,
}

/// Batch-job lifecycle states, as reported by the external orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Submitted,
    Starting,
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StatusKind {
    pub const ALL: [StatusKind; 6] = [
        StatusKind::Submitted,
        StatusKind::Starting,
        StatusKind::Pending,
        StatusKind::Running,
        StatusKind::Succeeded,
        StatusKind::Failed,
    ];
}

/// One state transition from the job-event feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStateChange {
    pub status: StatusKind,
    pub job_id: String,
    pub timestamp: i64,
}

/// Fresh totals read from the destination store (authoritative resync).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationTotals {
    pub total_vectors: u64,
    pub total_documents: u64,
}

// ---------------------------------------------------------------------------
// Classified events
// ---------------------------------------------------------------------------

/// Semantic category of a pipeline log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    PipelineSuccess,
    Deletion,
    StepProgress,
    Error,
    /// Job-feed transitions. The hub reports these through `jobStatusCounts`
    /// rather than the event log, so it never constructs this kind itself;
    /// it stays in the wire vocabulary for clients that label such events.
    BatchStateChange,
    Other,
}

/// A classified, display-ready event. Deduplicated downstream by the
/// (timestamp, message) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: i64,
    pub message: String,
    pub kind: EventKind,
}

// ---------------------------------------------------------------------------
// Client requests
// ---------------------------------------------------------------------------

/// Requests a connected client may send. Unknown actions fail to parse and
/// are dropped at dispatch with a warning.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientRequest {
    InitialCheck {
        #[serde(default)]
        data: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Outbound messages
// ---------------------------------------------------------------------------

/// Cumulative histogram of job state transitions seen. All six buckets are
/// always serialized so the client never has to default a missing key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct StatusCounts {
    pub submitted: u64,
    pub starting: u64,
    pub pending: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn bump(&mut self, status: StatusKind) {
        *self.bucket_mut(status) += 1;
    }

    pub fn get(&self, status: StatusKind) -> u64 {
        match status {
            StatusKind::Submitted => self.submitted,
            StatusKind::Starting => self.starting,
            StatusKind::Pending => self.pending,
            StatusKind::Running => self.running,
            StatusKind::Succeeded => self.succeeded,
            StatusKind::Failed => self.failed,
        }
    }

    fn bucket_mut(&mut self, status: StatusKind) -> &mut u64 {
        match status {
            StatusKind::Submitted => &mut self.submitted,
            StatusKind::Starting => &mut self.starting,
            StatusKind::Pending => &mut self.pending,
            StatusKind::Running => &mut self.running,
            StatusKind::Succeeded => &mut self.succeeded,
            StatusKind::Failed => &mut self.failed,
        }
    }
}

pub const SNAPSHOT_MESSAGE_TYPE: &str = "initialCheckResponse";

/// Full state snapshot sent to exactly one connection in response to an
/// `initialCheck` request.
///
/// The snapshot carries the deployment descriptor under the legacy wire name
/// `sourceArn`; incremental updates use `sourceDestinationEmbedding`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    #[serde(rename = "type")]
    pub message_type: String,
    pub logs: Vec<LogEvent>,
    pub job_status_counts: StatusCounts,
    pub total_vectors: u64,
    pub total_documents: u64,
    pub vectors_written: u64,
    pub documents_ingested: u64,
    #[serde(rename = "sourceArn")]
    pub source_arn: String,
}

/// Incremental partial update broadcast to every live connection.
///
/// Every field is optional; absent fields are left untouched client-side.
/// Counters always carry absolute values, never deltas, so redelivered or
/// reordered updates converge to the same client state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<LogEvent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_vectors: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_documents: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectors_written: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_ingested: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_status_counts: Option<StatusCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_destination_embedding: Option<String>,
}

/// Everything the hub can push to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Snapshot(SnapshotResponse),
    Update(StateUpdate),
}

// ---------------------------------------------------------------------------
// Client-side merge model
// ---------------------------------------------------------------------------

/// Mirror of the dashboard's view of the deployment. Used by tests to verify
/// the partial-update merge semantics without a real client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
    pub logs: Vec<LogEvent>,
    pub total_vectors: u64,
    pub total_documents: u64,
    pub vectors_written: u64,
    pub documents_ingested: u64,
    pub job_status_counts: StatusCounts,
    pub source_destination_embedding: String,
}

impl DashboardState {
    /// Replace the whole view from a full snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &SnapshotResponse) {
        self.logs = snapshot.logs.clone();
        self.total_vectors = snapshot.total_vectors;
        self.total_documents = snapshot.total_documents;
        self.vectors_written = snapshot.vectors_written;
        self.documents_ingested = snapshot.documents_ingested;
        self.job_status_counts = snapshot.job_status_counts;
        self.source_destination_embedding = snapshot.source_arn.clone();
    }
}

impl StateUpdate {
    /// Merge this partial update into a client view. Absent fields leave the
    /// existing value in place; log batches go through the same bounded
    /// merge-and-trim the hub uses.
    pub fn merge_into(&self, state: &mut DashboardState) {
        if let Some(logs) = &self.logs {
            state.logs = crate::aggregate::merge_recent(&state.logs, logs);
        }
        if let Some(v) = self.total_vectors {
            state.total_vectors = v;
        }
        if let Some(v) = self.total_documents {
            state.total_documents = v;
        }
        if let Some(v) = self.vectors_written {
            state.vectors_written = v;
        }
        if let Some(v) = self.documents_ingested {
            state.documents_ingested = v;
        }
        if let Some(counts) = self.job_status_counts {
            state.job_status_counts = counts;
        }
        if let Some(desc) = &self.source_destination_embedding {
            state.source_destination_embedding = desc.clone();
        }
    }
}
