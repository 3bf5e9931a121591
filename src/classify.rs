//! Pure classification of raw pipeline log lines.
//!
//! The upstream log subscription only forwards lines matching
//! [`FILTER_TERMS`], so everything arriving here is already known to be
//! interesting. Classification assigns a semantic kind for display and drives
//! counter extraction in the router.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::protocol::{EventKind, LogEvent, RawLogLine};

/// Substring allow-list applied by the upstream log subscription filter.
/// Kept here so tests and feed simulations stay in sync with the deployed
/// filter pattern.
pub const FILTER_TERMS: &[&str] = &[
    "ingest process finished in",
    "Deleting vectors from database",
    "Deleting File:",
    "calling PartitionStep",
    "calling ChunkStep",
    "calling EmbedStep",
    "writing a total of",
];

static PROCESS_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.*?Process\s+").expect("valid prefix regex"));

static VECTOR_TOTAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"writing a total of (\d+)\b").expect("valid vector total regex"));

/// Classify a raw log line. First match wins; the categories overlap by
/// substring, so the order below is load-bearing.
///
/// The error rule compares case-insensitively ("error", "ERROR", "Failed"
/// all match); the other rules match the exact casing the pipeline emits.
pub fn classify(raw: &str) -> EventKind {
    if raw.contains("ingest process finished in") || raw.contains("writing a total") {
        return EventKind::PipelineSuccess;
    }
    if raw.contains("Deleting") {
        return EventKind::Deletion;
    }
    if raw.contains("PartitionStep") || raw.contains("ChunkStep") || raw.contains("EmbedStep") {
        return EventKind::StepProgress;
    }
    let lower = raw.to_ascii_lowercase();
    if lower.contains("error") || lower.contains("failed") {
        return EventKind::Error;
    }
    EventKind::Other
}

/// Strip the leading worker-process prefix (e.g. `"MainProcess ERROR ..."`
/// becomes `"ERROR ..."`). Cosmetic only; classification runs on the raw
/// message.
pub fn normalize_message(raw: &str) -> String {
    PROCESS_PREFIX.replace(raw, "").into_owned()
}

/// Extract the vector count from a `"writing a total of N ..."` line.
/// Returns `None` when the line carries no parseable count; the line is
/// still recorded as an event either way.
pub fn extract_vector_delta(raw: &str) -> Option<u64> {
    let caps = VECTOR_TOTAL.captures(raw)?;
    caps.get(1)?.as_str().parse().ok()
}

/// True when the line marks one document finishing ingestion.
pub fn is_document_finished(raw: &str) -> bool {
    raw.contains("ingest process finished")
}

/// Classify and normalize one feed line into a display-ready event.
pub fn to_event(line: &RawLogLine) -> LogEvent {
    LogEvent {
        timestamp: line.timestamp,
        message: normalize_message(&line.message),
        kind: classify(&line.message),
    }
}
