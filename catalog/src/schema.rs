//! Embedded schema bootstrap.

use crate::{Db, Result};

/// Schema statements, applied in order. Each is idempotent.
///
/// Both latency tables carry a composite primary key so worker retries and
/// aggregator re-runs resolve through `ON CONFLICT DO NOTHING`, and both
/// cascade away when the referenced monitor or server is deleted.
const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS region (
        region_id  INTEGER PRIMARY KEY,
        name       TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS servers (
        server_id            INTEGER PRIMARY KEY,
        region_id            INTEGER NOT NULL
                             REFERENCES region (region_id) ON DELETE CASCADE,
        identifier           TEXT NOT NULL UNIQUE,
        status               TEXT NOT NULL DEFAULT 'UNKNOWN',
        monitor_service_rate REAL NOT NULL DEFAULT 0,
        cpu_loading          REAL NOT NULL DEFAULT 0,
        memory_loading       REAL NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS customer_capabilities (
        customer_id             INTEGER PRIMARY KEY,
        polling_interval        INTEGER NOT NULL,
        maximum_number_monitors INTEGER NOT NULL,
        expiration_days         INTEGER NOT NULL,
        flags                   INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS monitor (
        monitor_id     INTEGER PRIMARY KEY,
        customer_id    INTEGER NOT NULL,
        host_scheme_id INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS latency_seconds (
        monitor_id INTEGER NOT NULL
                   REFERENCES monitor (monitor_id) ON DELETE CASCADE,
        server_id  INTEGER NOT NULL
                   REFERENCES servers (server_id) ON DELETE CASCADE,
        timestamp  INTEGER NOT NULL,
        latency    INTEGER NOT NULL,
        PRIMARY KEY (monitor_id, server_id, timestamp)
    ) WITHOUT ROWID",
    "CREATE INDEX IF NOT EXISTS latency_seconds_timestamp
        ON latency_seconds (timestamp)",
    "CREATE TABLE IF NOT EXISTS latency_aggregated (
        monitor_id       INTEGER NOT NULL
                         REFERENCES monitor (monitor_id) ON DELETE CASCADE,
        server_id        INTEGER NOT NULL
                         REFERENCES servers (server_id) ON DELETE CASCADE,
        timestamp        INTEGER NOT NULL,
        latency          INTEGER NOT NULL,
        start_timestamp  INTEGER NOT NULL,
        end_timestamp    INTEGER NOT NULL,
        mean_latency     REAL NOT NULL,
        variance_latency REAL NOT NULL,
        minimum_latency  INTEGER NOT NULL,
        maximum_latency  INTEGER NOT NULL,
        number_samples   INTEGER NOT NULL,
        PRIMARY KEY (monitor_id, server_id, start_timestamp)
    ) WITHOUT ROWID",
    "CREATE INDEX IF NOT EXISTS latency_aggregated_timestamp
        ON latency_aggregated (timestamp)",
];

/// Create any missing tables and indexes.
pub async fn setup_schema(db: &Db) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(db.pool()).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn setup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::connect(dir.path().join("catalog.sqlite"), 2)
            .await
            .unwrap();

        setup_schema(&db).await.unwrap();
        setup_schema(&db).await.unwrap();
    }
}
