//! Read access to the monitor catalog.

use std::collections::HashMap;

use data_types::{CustomerId, HostSchemeId, Monitor, MonitorId};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::{id_u32, Db, Result};

/// Reader for the `monitor` table.
///
/// Only the columns the latency pipeline consumes are read; the full probe
/// definition belongs to the admin surface.
#[derive(Debug, Clone)]
pub struct Monitors {
    db: Db,
}

impl Monitors {
    /// Create a reader over `db`.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Look up one monitor by id.
    pub async fn get(&self, monitor_id: MonitorId) -> Result<Option<Monitor>> {
        let row = sqlx::query(
            "SELECT monitor_id, customer_id, host_scheme_id FROM monitor WHERE monitor_id = ?",
        )
        .bind(i64::from(monitor_id.get()))
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| decode_monitor(&r)).transpose()
    }

    /// All monitors, keyed by id.
    pub async fn all(&self) -> Result<HashMap<MonitorId, Monitor>> {
        let rows = sqlx::query("SELECT monitor_id, customer_id, host_scheme_id FROM monitor")
            .fetch_all(self.db.pool())
            .await?;

        rows.iter()
            .map(|r| decode_monitor(r).map(|m| (m.monitor_id, m)))
            .collect()
    }
}

fn decode_monitor(row: &SqliteRow) -> Result<Monitor> {
    Ok(Monitor {
        monitor_id: MonitorId::new(id_u32(
            row.try_get("monitor_id")?,
            "monitor",
            "monitor_id",
        )?),
        customer_id: CustomerId::new(id_u32(
            row.try_get("customer_id")?,
            "monitor",
            "customer_id",
        )?),
        host_scheme_id: HostSchemeId::new(id_u32(
            row.try_get("host_scheme_id")?,
            "monitor",
            "host_scheme_id",
        )?),
    })
}
