//! Read access to the regions catalog.

use std::collections::HashMap;

use data_types::{Region, RegionId};
use sqlx::Row;

use crate::{id_u16, Db, Result};

/// Reader for the `region` table.
#[derive(Debug, Clone)]
pub struct Regions {
    db: Db,
}

impl Regions {
    /// Create a reader over `db`.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Look up one region by id.
    pub async fn get(&self, region_id: RegionId) -> Result<Option<Region>> {
        let row = sqlx::query("SELECT region_id, name FROM region WHERE region_id = ?")
            .bind(i64::from(region_id.get()))
            .fetch_optional(self.db.pool())
            .await?;

        row.map(|r| {
            Ok(Region {
                region_id: RegionId::new(id_u16(r.try_get("region_id")?, "region", "region_id")?),
                name: r.try_get("name")?,
            })
        })
        .transpose()
    }

    /// All regions, keyed by id.
    pub async fn all(&self) -> Result<HashMap<RegionId, Region>> {
        let rows = sqlx::query("SELECT region_id, name FROM region")
            .fetch_all(self.db.pool())
            .await?;

        rows.iter()
            .map(|r| {
                let id = RegionId::new(id_u16(r.try_get("region_id")?, "region", "region_id")?);
                Ok((
                    id,
                    Region {
                        region_id: id,
                        name: r.try_get("name")?,
                    },
                ))
            })
            .collect()
    }
}
