//! Shared fixtures for crate tests: a throwaway file-backed database with
//! the full schema, plus seeding and inspection helpers.
//!
//! Lives in its own crate so every pipeline crate's tests build fixtures
//! the same way without re-implementing the SQL.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]

use catalog::{setup_schema, Db};
use tempfile::TempDir;

/// A fresh database in a temporary directory, deleted on drop.
#[derive(Debug)]
pub struct TestDb {
    /// Keeps the backing directory alive for the life of the fixture.
    _dir: TempDir,
    /// Handle to the database.
    pub db: Db,
}

impl TestDb {
    /// Create a database with the full schema and an empty catalog.
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let db = Db::connect(dir.path().join("pulse.sqlite"), 5)
            .await
            .expect("open test database");
        setup_schema(&db).await.expect("bootstrap schema");

        Self { _dir: dir, db }
    }

    /// Insert a region row.
    pub async fn seed_region(&self, region_id: u16, name: &str) {
        sqlx::query("INSERT INTO region (region_id, name) VALUES (?, ?)")
            .bind(i64::from(region_id))
            .bind(name)
            .execute(self.db.pool())
            .await
            .expect("seed region");
    }

    /// Insert a server row in `region_id` with default telemetry.
    pub async fn seed_server(&self, server_id: u16, region_id: u16, identifier: &str) {
        sqlx::query(
            "INSERT INTO servers (server_id, region_id, identifier, status) \
             VALUES (?, ?, ?, 'ACTIVE')",
        )
        .bind(i64::from(server_id))
        .bind(i64::from(region_id))
        .bind(identifier)
        .execute(self.db.pool())
        .await
        .expect("seed server");
    }

    /// Insert a monitor row.
    pub async fn seed_monitor(&self, monitor_id: u32, customer_id: u32, host_scheme_id: u32) {
        sqlx::query(
            "INSERT INTO monitor (monitor_id, customer_id, host_scheme_id) VALUES (?, ?, ?)",
        )
        .bind(i64::from(monitor_id))
        .bind(i64::from(customer_id))
        .bind(i64::from(host_scheme_id))
        .execute(self.db.pool())
        .await
        .expect("seed monitor");
    }

    /// Insert a customer capability record.
    pub async fn seed_customer(&self, customer_id: u32, flags: u16) {
        sqlx::query(
            "INSERT INTO customer_capabilities \
             (customer_id, polling_interval, maximum_number_monitors, expiration_days, flags) \
             VALUES (?, 60, 100, 90, ?)",
        )
        .bind(i64::from(customer_id))
        .bind(i64::from(flags))
        .execute(self.db.pool())
        .await
        .expect("seed customer");
    }

    /// Insert one raw latency row directly, bypassing the ingest pipeline.
    pub async fn insert_raw(&self, monitor_id: u32, server_id: u16, timestamp: u32, latency: u32) {
        sqlx::query(
            "INSERT INTO latency_seconds (monitor_id, server_id, timestamp, latency) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(i64::from(monitor_id))
        .bind(i64::from(server_id))
        .bind(i64::from(timestamp))
        .bind(i64::from(latency))
        .execute(self.db.pool())
        .await
        .expect("insert raw latency row");
    }

    /// Raw rows as `(monitor_id, server_id, timestamp, latency)`, in
    /// `(monitor, server, timestamp)` order.
    pub async fn raw_rows(&self) -> Vec<(u32, u16, u32, u32)> {
        use sqlx::Row;

        sqlx::query(
            "SELECT monitor_id, server_id, timestamp, latency FROM latency_seconds \
             ORDER BY monitor_id, server_id, timestamp",
        )
        .fetch_all(self.db.pool())
        .await
        .expect("fetch raw rows")
        .iter()
        .map(|r| {
            (
                r.get::<i64, _>("monitor_id") as u32,
                r.get::<i64, _>("server_id") as u16,
                r.get::<i64, _>("timestamp") as u32,
                r.get::<i64, _>("latency") as u32,
            )
        })
        .collect()
    }

    /// Number of rows in the aggregated table.
    pub async fn count_aggregated(&self) -> i64 {
        use sqlx::Row;

        sqlx::query("SELECT COUNT(*) AS n FROM latency_aggregated")
            .fetch_one(self.db.pool())
            .await
            .expect("count aggregated rows")
            .get("n")
    }
}
