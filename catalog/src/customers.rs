//! Read access to customer capability records.

use data_types::{CustomerCapabilities, CustomerId};
use sqlx::Row;

use crate::{id_u32, Db, Error, Result};

/// Reader for the `customer_capabilities` table.
#[derive(Debug, Clone)]
pub struct Customers {
    db: Db,
}

impl Customers {
    /// Create a reader over `db`.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// The capability record for `customer_id`, if the customer exists.
    pub async fn capabilities(
        &self,
        customer_id: CustomerId,
    ) -> Result<Option<CustomerCapabilities>> {
        let row = sqlx::query(
            "SELECT customer_id, polling_interval, maximum_number_monitors, \
             expiration_days, flags FROM customer_capabilities WHERE customer_id = ?",
        )
        .bind(i64::from(customer_id.get()))
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| {
            let flags = u16::try_from(r.try_get::<i64, _>("flags")?).map_err(|_| {
                Error::MalformedRow {
                    table: "customer_capabilities",
                    column: "flags",
                }
            })?;

            Ok(CustomerCapabilities {
                customer_id: CustomerId::new(id_u32(
                    r.try_get("customer_id")?,
                    "customer_capabilities",
                    "customer_id",
                )?),
                polling_interval: id_u32(
                    r.try_get("polling_interval")?,
                    "customer_capabilities",
                    "polling_interval",
                )?,
                maximum_number_monitors: id_u32(
                    r.try_get("maximum_number_monitors")?,
                    "customer_capabilities",
                    "maximum_number_monitors",
                )?,
                expiration_days: id_u32(
                    r.try_get("expiration_days")?,
                    "customer_capabilities",
                    "expiration_days",
                )?,
                flags,
            })
        })
        .transpose()
    }
}
