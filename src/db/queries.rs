use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::{Database, DbError};

// ---------------------------------------------------------------------------
// Row types — flat structs that map directly to table columns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRow {
    pub connection_id: String,
    pub established_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateStateRow {
    pub deployment_id: String,
    pub total_vectors: i64,
    pub total_documents: i64,
    pub vectors_written: i64,
    pub documents_ingested: i64,
    pub job_status_counts_json: String,
    pub recent_events_json: String,
    pub source_destination_embedding: String,
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// Connection queries
// ---------------------------------------------------------------------------

pub fn insert_connection(db: &Database, row: &ConnectionRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "INSERT OR IGNORE INTO connections (connection_id, established_at) VALUES (?1, ?2)",
        params![row.connection_id, row.established_at],
    )?;
    Ok(())
}

pub fn delete_connection(db: &Database, connection_id: &str) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "DELETE FROM connections WHERE connection_id = ?1",
        params![connection_id],
    )?;
    Ok(())
}

/// All registered connections, oldest connect time first.
pub fn list_connections(db: &Database) -> Result<Vec<ConnectionRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT connection_id, established_at FROM connections ORDER BY established_at, connection_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ConnectionRow {
                connection_id: row.get(0)?,
                established_at: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Aggregate state queries
// ---------------------------------------------------------------------------

pub fn upsert_aggregate_state(db: &Database, row: &AggregateStateRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO aggregate_state (
            deployment_id, total_vectors, total_documents, vectors_written,
            documents_ingested, job_status_counts_json, recent_events_json,
            source_destination_embedding, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(deployment_id) DO UPDATE SET
            total_vectors = excluded.total_vectors,
            total_documents = excluded.total_documents,
            vectors_written = excluded.vectors_written,
            documents_ingested = excluded.documents_ingested,
            job_status_counts_json = excluded.job_status_counts_json,
            recent_events_json = excluded.recent_events_json,
            source_destination_embedding = excluded.source_destination_embedding,
            updated_at = excluded.updated_at",
        params![
            row.deployment_id,
            row.total_vectors,
            row.total_documents,
            row.vectors_written,
            row.documents_ingested,
            row.job_status_counts_json,
            row.recent_events_json,
            row.source_destination_embedding,
            row.updated_at
        ],
    )?;
    Ok(())
}

pub fn get_aggregate_state(
    db: &Database,
    deployment_id: &str,
) -> Result<Option<AggregateStateRow>, DbError> {
    let conn = db.conn();
    let row = conn
        .query_row(
            "SELECT deployment_id, total_vectors, total_documents, vectors_written,
                    documents_ingested, job_status_counts_json, recent_events_json,
                    source_destination_embedding, updated_at
             FROM aggregate_state WHERE deployment_id = ?1",
            params![deployment_id],
            |row| {
                Ok(AggregateStateRow {
                    deployment_id: row.get(0)?,
                    total_vectors: row.get(1)?,
                    total_documents: row.get(2)?,
                    vectors_written: row.get(3)?,
                    documents_ingested: row.get(4)?,
                    job_status_counts_json: row.get(5)?,
                    recent_events_json: row.get(6)?,
                    source_destination_embedding: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

// ---------------------------------------------------------------------------
// Idempotency keys
// ---------------------------------------------------------------------------

/// Record a log-line key; returns true when this is the first time the key
/// was seen. At-least-once feed redelivery hits the conflict path and returns
/// false, which gates delta counter application.
pub fn record_ingested_line(db: &Database, line_key: &str) -> Result<bool, DbError> {
    let conn = db.conn();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO ingested_lines (line_key, seen_at) VALUES (?1, datetime('now'))",
        params![line_key],
    )?;
    Ok(inserted == 1)
}

/// Delete idempotency keys older than `older_than_hours`. Keys only need to
/// outlive the feed's redelivery window, so the table stays bounded on
/// long-lived deployments. Returns the number of keys removed.
pub fn prune_ingested_lines(db: &Database, older_than_hours: i64) -> Result<usize, DbError> {
    let conn = db.conn();
    let removed = conn.execute(
        "DELETE FROM ingested_lines WHERE seen_at < datetime('now', ?1)",
        params![format!("-{older_than_hours} hours")],
    )?;
    Ok(removed)
}
