use rusqlite::Connection;

use super::DbError;

struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: r#"
CREATE TABLE connections (
    connection_id   TEXT PRIMARY KEY,
    established_at  INTEGER NOT NULL
);

CREATE TABLE aggregate_state (
    deployment_id               TEXT PRIMARY KEY,
    total_vectors               INTEGER NOT NULL DEFAULT 0,
    total_documents             INTEGER NOT NULL DEFAULT 0,
    vectors_written             INTEGER NOT NULL DEFAULT 0,
    documents_ingested          INTEGER NOT NULL DEFAULT 0,
    job_status_counts_json      TEXT NOT NULL,
    recent_events_json          TEXT NOT NULL,
    source_destination_embedding TEXT NOT NULL DEFAULT '',
    updated_at                  TEXT NOT NULL
);
"#,
    },
    Migration {
        version: 2,
        sql: r#"
CREATE INDEX idx_connections_established ON connections(established_at);
"#,
    },
    Migration {
        version: 3,
        sql: r#"
CREATE TABLE ingested_lines (
    line_key    TEXT PRIMARY KEY,
    seen_at     TEXT NOT NULL
);
"#,
    },
    Migration {
        version: 4,
        sql: r#"
CREATE INDEX idx_ingested_lines_seen ON ingested_lines(seen_at);
"#,
    },
];

pub(super) fn run_migrations(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );",
    )?;

    let applied: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT version FROM _migrations ORDER BY version")?;
        let result = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        result
    };

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }

        tracing::info!("applying migration v{}", migration.version);

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DbError::Migration(format!("v{}: {e}", migration.version)))?;
        tx.execute(
            "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
            rusqlite::params![migration.version],
        )?;
        tx.commit()?;
    }

    Ok(())
}
