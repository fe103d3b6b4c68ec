//! Read access to the servers catalog, plus the telemetry update driven by
//! worker uploads.

use std::collections::HashMap;

use data_types::{RegionId, Server, ServerId, ServerStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

use crate::{id_u16, Db, Result};

const COLUMNS: &str = "server_id, region_id, identifier, status, \
                       monitor_service_rate, cpu_loading, memory_loading";

/// Reader for the `servers` table.
#[derive(Debug, Clone)]
pub struct Servers {
    db: Db,
}

impl Servers {
    /// Create a reader over `db`.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Look up one server by id.
    pub async fn get(&self, server_id: ServerId) -> Result<Option<Server>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM servers WHERE server_id = ?"
        ))
        .bind(i64::from(server_id.get()))
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| decode_server(&r)).transpose()
    }

    /// Look up one server by its reported identifier.
    pub async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Server>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM servers WHERE identifier = ?"
        ))
        .bind(identifier)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| decode_server(&r)).transpose()
    }

    /// All servers, keyed by id.
    pub async fn all(&self) -> Result<HashMap<ServerId, Server>> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM servers"))
            .fetch_all(self.db.pool())
            .await?;

        rows.iter()
            .map(|r| decode_server(r).map(|s| (s.server_id, s)))
            .collect()
    }

    /// Persist the telemetry a server reported in an upload: status,
    /// service rate, and loadings. The other columns belong to the admin
    /// surface and are left untouched.
    pub async fn update_telemetry(&self, server: &Server) -> Result<()> {
        let result = sqlx::query(
            "UPDATE servers SET status = ?, monitor_service_rate = ?, \
             cpu_loading = ?, memory_loading = ? WHERE server_id = ?",
        )
        .bind(server.status.as_str())
        .bind(f64::from(server.monitors_per_second))
        .bind(f64::from(server.cpu_loading))
        .bind(f64::from(server.memory_loading))
        .bind(i64::from(server.server_id.get()))
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            warn!(server_id = %server.server_id, "telemetry update matched no server");
        }

        Ok(())
    }
}

fn decode_server(row: &SqliteRow) -> Result<Server> {
    let server_id = id_u16(row.try_get("server_id")?, "servers", "server_id")?;
    let region_id = id_u16(row.try_get("region_id")?, "servers", "region_id")?;
    let identifier: String = row.try_get("identifier")?;

    let status_text: String = row.try_get("status")?;
    let status = ServerStatus::from_str_opt(&status_text).unwrap_or_else(|| {
        warn!(server_id, status = %status_text, "unknown server status in catalog");
        ServerStatus::Unknown
    });

    Ok(Server {
        server_id: ServerId::new(server_id),
        region_id: RegionId::new(region_id),
        identifier,
        status,
        monitors_per_second: row.try_get::<f64, _>("monitor_service_rate")? as f32,
        cpu_loading: row.try_get::<f64, _>("cpu_loading")? as f32,
        memory_loading: row.try_get::<f64, _>("memory_loading")? as f32,
    })
}
