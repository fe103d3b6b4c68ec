//! Background compression of aging latency data into fixed-period
//! statistical summaries, plus the retention sweep that bounds table
//! growth.
//!
//! An [`Aggregator`] owns one input→output edge. The usual deployment runs
//! a single instance reading `latency_seconds` and writing
//! `latency_aggregated`; a second instance can re-aggregate
//! `latency_aggregated` onto itself with a longer window by setting
//! `input_aggregated`. Parameters are retunable while the worker runs.
//!
//! Every tick is transactional: reading eligible rows, deleting them, and
//! writing their summaries either all happen or none do. The retention
//! sweep that follows is best-effort and runs even when aggregation failed.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations,
    missing_docs
)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use catalog::Db;
use data_types::{
    to_zoran, AggregatedSample, CustomerId, MonitorId, ServerId,
};
use parking_lot::Mutex;
use sqlx::{Row, Sqlite, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod picker;
mod resample;

use picker::IndexPicker;
use resample::{generate_windows, InputRow, InputSummary};

/// Errors from aggregation operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying driver failed; the tick rolled back and will be
    /// retried on the next cadence.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Convenience result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Operator-tunable aggregation parameters.
#[derive(Debug, Clone)]
pub struct Parameters {
    /// Table eligible rows are read (and deleted) from.
    pub input_table: String,
    /// Table summaries are written to.
    pub output_table: String,
    /// Rows older than this many seconds are eligible for aggregation.
    pub input_table_max_age: u64,
    /// Width of one aggregation window, seconds. Also the tick cadence.
    pub resample_period: u32,
    /// Rows older than this many seconds are deleted from both tables.
    pub expunge_period: u64,
    /// Whether the input table holds pre-aggregated summaries.
    pub input_aggregated: bool,
}

impl Parameters {
    /// Parameters for the first tier: raw seconds in, summaries out.
    pub fn raw_tier(input_table_max_age: u64, resample_period: u32, expunge_period: u64) -> Self {
        Self {
            input_table: "latency_seconds".to_owned(),
            output_table: "latency_aggregated".to_owned(),
            input_table_max_age,
            resample_period,
            expunge_period,
            input_aggregated: false,
        }
    }

    /// Parameters for a re-aggregation tier: summaries in, coarser
    /// summaries out, same table.
    pub fn reaggregation_tier(
        input_table_max_age: u64,
        resample_period: u32,
        expunge_period: u64,
    ) -> Self {
        Self {
            input_table: "latency_aggregated".to_owned(),
            output_table: "latency_aggregated".to_owned(),
            input_table_max_age,
            resample_period,
            expunge_period,
            input_aggregated: true,
        }
    }
}

/// Periodically compresses aging rows into window summaries and enforces
/// the retention horizon.
#[derive(Debug)]
pub struct Aggregator {
    db: Db,
    time: Arc<dyn pulse_time::TimeProvider>,
    parameters: Mutex<Parameters>,
    picker: Mutex<IndexPicker>,
}

impl Aggregator {
    /// Create an aggregator over `db` with an initial parameter set.
    pub fn new(db: Db, time: Arc<dyn pulse_time::TimeProvider>, parameters: Parameters) -> Self {
        Self {
            db,
            time,
            parameters: Mutex::new(parameters),
            picker: Mutex::new(IndexPicker::new()),
        }
    }

    /// Replace the parameter set; takes effect on the next tick.
    pub fn set_parameters(&self, parameters: Parameters) {
        *self.parameters.lock() = parameters;
    }

    /// The current parameter set.
    pub fn parameters(&self) -> Parameters {
        self.parameters.lock().clone()
    }

    /// Run ticks on the resample cadence until `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let period = self.parameters.lock().resample_period.max(1);

                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(u64::from(period))) => {}
                    _ = shutdown.cancelled() => break,
                }

                if let Err(e) = self.tick().await {
                    warn!(error = %e, "aggregation tick failed, will retry next period");
                }
            }
        })
    }

    /// Run one aggregation pass now.
    ///
    /// Aggregation (read, delete consumed input, write summaries) is one
    /// transaction; the retention sweep afterwards is attempted regardless
    /// of its outcome.
    pub async fn tick(&self) -> Result<()> {
        let parameters = self.parameters.lock().clone();
        let now = self.time.now_unix();

        let aggregation = self.aggregate(&parameters, now).await;

        // Retention is best-effort: attempted even when aggregation rolled
        // back, and a failure only logs.
        if let Err(e) = self.expunge(&parameters, now).await {
            warn!(error = %e, "retention sweep failed");
        }

        aggregation
    }

    async fn aggregate(&self, parameters: &Parameters, now: u64) -> Result<()> {
        let period = parameters.resample_period;
        if period == 0 {
            return Ok(());
        }

        // Snap the eligibility threshold down to a window boundary so a
        // partially-filled trailing window is never aggregated early.
        let mut threshold = to_zoran(now.saturating_sub(parameters.input_table_max_age));
        threshold -= threshold % period;

        let mut tx = self.db.pool().begin().await?;

        let rows = read_eligible(
            &mut tx,
            &parameters.input_table,
            threshold,
            parameters.input_aggregated,
        )
        .await?;
        if rows.is_empty() {
            return Ok(());
        }

        let windows = {
            let mut picker = self.picker.lock();
            generate_windows(&rows, period, &mut picker)
        };

        // Consumed input goes first: when a tier re-aggregates a table
        // onto itself the fresh summaries must survive this delete.
        sqlx::query(&format!(
            "DELETE FROM {} WHERE timestamp < ?",
            parameters.input_table
        ))
        .bind(i64::from(threshold))
        .execute(&mut tx)
        .await?;

        write_windows(&mut tx, &parameters.output_table, &windows).await?;

        tx.commit().await?;

        info!(
            input_table = %parameters.input_table,
            rows = rows.len(),
            windows = windows.len(),
            "aggregated latency rows"
        );

        Ok(())
    }

    /// Delete everything older than the expunge horizon from both tables.
    async fn expunge(&self, parameters: &Parameters, now: u64) -> Result<()> {
        let threshold = to_zoran(now.saturating_sub(parameters.expunge_period));

        // When a tier reads and writes the same table one sweep suffices.
        if parameters.input_table != parameters.output_table {
            self.delete_older_than(&parameters.input_table, threshold)
                .await?;
        }

        self.delete_older_than(&parameters.output_table, threshold)
            .await
    }

    async fn delete_older_than(&self, table: &str, threshold: u32) -> Result<()> {
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE timestamp < ?"))
            .bind(i64::from(threshold))
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() > 0 {
            info!(
                table,
                rows = result.rows_affected(),
                "expunged rows past the retention horizon"
            );
        }

        Ok(())
    }

    /// Delete all latency data belonging to the given customers, from both
    /// tables, in one transaction. Used by account-closure flows.
    pub async fn delete_by_customer(&self, customer_ids: &BTreeSet<CustomerId>) -> Result<()> {
        if customer_ids.is_empty() {
            return Ok(());
        }

        let parameters = self.parameters.lock().clone();

        // Ids are integers; interpolation is safe and keeps one statement
        // per table regardless of set size.
        let id_list = customer_ids
            .iter()
            .map(|id| id.get().to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut tables = vec![parameters.input_table.clone()];
        if parameters.output_table != parameters.input_table {
            tables.push(parameters.output_table.clone());
        }

        let mut tx = self.db.pool().begin().await?;
        for table in &tables {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE monitor_id IN \
                 (SELECT monitor_id FROM monitor WHERE customer_id IN ({id_list}))"
            ))
            .execute(&mut tx)
            .await?;
        }
        tx.commit().await?;

        info!(customers = customer_ids.len(), "purged latency data by customer");
        Ok(())
    }
}

async fn read_eligible(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    threshold: u32,
    input_aggregated: bool,
) -> Result<Vec<InputRow>> {
    let columns = if input_aggregated {
        "monitor_id, server_id, timestamp, latency, start_timestamp, end_timestamp, \
         mean_latency, variance_latency, minimum_latency, maximum_latency, number_samples"
    } else {
        "monitor_id, server_id, timestamp, latency"
    };

    let rows = sqlx::query(&format!(
        "SELECT {columns} FROM {table} WHERE timestamp < ? \
         ORDER BY monitor_id ASC, server_id ASC, timestamp ASC"
    ))
    .bind(i64::from(threshold))
    .fetch_all(&mut *tx)
    .await?;

    rows.iter()
        .map(|r| {
            let summary = if input_aggregated {
                Some(InputSummary {
                    start_timestamp: r.try_get::<i64, _>("start_timestamp")? as u32,
                    end_timestamp: r.try_get::<i64, _>("end_timestamp")? as u32,
                    mean_latency: r.try_get("mean_latency")?,
                    variance_latency: r.try_get("variance_latency")?,
                    minimum_latency: r.try_get::<i64, _>("minimum_latency")? as u32,
                    maximum_latency: r.try_get::<i64, _>("maximum_latency")? as u32,
                    number_samples: r.try_get::<i64, _>("number_samples")? as u32,
                })
            } else {
                None
            };

            Ok(InputRow {
                monitor_id: MonitorId::new(r.try_get::<i64, _>("monitor_id")? as u32),
                server_id: ServerId::new(r.try_get::<i64, _>("server_id")? as u16),
                timestamp: r.try_get::<i64, _>("timestamp")? as u32,
                latency: r.try_get::<i64, _>("latency")? as u32,
                summary,
            })
        })
        .collect()
}

async fn write_windows(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    windows: &[AggregatedSample],
) -> Result<()> {
    let statement = format!(
        "INSERT INTO {table} (monitor_id, server_id, timestamp, latency, \
         start_timestamp, end_timestamp, mean_latency, variance_latency, \
         minimum_latency, maximum_latency, number_samples) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING"
    );

    for window in windows {
        sqlx::query(&statement)
            .bind(i64::from(window.sample.monitor_id.get()))
            .bind(i64::from(window.sample.server_id.get()))
            .bind(i64::from(window.sample.zoran_timestamp))
            .bind(i64::from(window.sample.latency_micros))
            .bind(i64::from(window.start_zoran_timestamp))
            .bind(i64::from(window.end_zoran_timestamp))
            .bind(window.mean_latency_micros)
            .bind(window.variance_latency_micros)
            .bind(i64::from(window.minimum_latency_micros))
            .bind(i64::from(window.maximum_latency_micros))
            .bind(i64::from(window.number_samples))
            .execute(&mut *tx)
            .await?;
    }

    Ok(())
}
