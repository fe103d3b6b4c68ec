//! Read-side queries over the union of raw and aggregated latency data.
//!
//! Callers describe what they want with a [`LatencyFilter`]; the querier
//! composes one WHERE clause from it (most specific predicate wins on each
//! axis), reads both tables, and for statistics pools the raw-table SQL
//! aggregate with every matching aggregated row using the exact
//! pooled-variance formula.

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

use catalog::Db;
use data_types::{
    to_zoran, AggregatedSample, CustomerId, HostSchemeId, MonitorId, RegionId, Sample, ServerId,
    StatisticsAccumulator,
};
use sqlx::{QueryBuilder, Row, Sqlite};

/// Errors from query operations. Callers generally log these and present
/// "no data" rather than failing a request outright.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying driver failed.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Convenience result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What to read. Every field is optional; unset fields widen the result.
///
/// On the monitor axis, the most specific predicate wins: an explicit
/// `monitor_id` beats `host_scheme_id`, which beats `customer_id`. On the
/// server axis an explicit `server_id` beats `region_id`. Time bounds are
/// Unix seconds, converted to Zoran coordinates for the comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyFilter {
    /// Restrict to one customer's monitors.
    pub customer_id: Option<CustomerId>,
    /// Restrict to the monitors of one host/scheme.
    pub host_scheme_id: Option<HostSchemeId>,
    /// Restrict to one monitor.
    pub monitor_id: Option<MonitorId>,
    /// Restrict to the servers of one region.
    pub region_id: Option<RegionId>,
    /// Restrict to one server.
    pub server_id: Option<ServerId>,
    /// Inclusive lower time bound, Unix seconds.
    pub start_timestamp: Option<u64>,
    /// Inclusive upper time bound, Unix seconds.
    pub end_timestamp: Option<u64>,
}

impl LatencyFilter {
    fn push_where(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        let mut has_constraint = false;
        let sep = |builder: &mut QueryBuilder<'_, Sqlite>, has: &mut bool| {
            builder.push(if *has { " AND " } else { " WHERE " });
            *has = true;
        };

        if let Some(monitor_id) = self.monitor_id {
            sep(builder, &mut has_constraint);
            builder
                .push("monitor_id = ")
                .push_bind(i64::from(monitor_id.get()));
        } else if let Some(host_scheme_id) = self.host_scheme_id {
            sep(builder, &mut has_constraint);
            builder
                .push("monitor_id IN (SELECT monitor_id FROM monitor WHERE host_scheme_id = ")
                .push_bind(i64::from(host_scheme_id.get()))
                .push(")");
        } else if let Some(customer_id) = self.customer_id {
            sep(builder, &mut has_constraint);
            builder
                .push("monitor_id IN (SELECT monitor_id FROM monitor WHERE customer_id = ")
                .push_bind(i64::from(customer_id.get()))
                .push(")");
        }

        if let Some(server_id) = self.server_id {
            sep(builder, &mut has_constraint);
            builder
                .push("server_id = ")
                .push_bind(i64::from(server_id.get()));
        } else if let Some(region_id) = self.region_id {
            sep(builder, &mut has_constraint);
            builder
                .push("server_id IN (SELECT server_id FROM servers WHERE region_id = ")
                .push_bind(i64::from(region_id.get()))
                .push(")");
        }

        if let Some(start) = self.start_timestamp {
            sep(builder, &mut has_constraint);
            builder
                .push("timestamp >= ")
                .push_bind(i64::from(to_zoran(start)));
        }

        if let Some(end) = self.end_timestamp {
            sep(builder, &mut has_constraint);
            builder
                .push("timestamp <= ")
                .push_bind(i64::from(to_zoran(end)));
        }
    }
}

/// Read access to the union of `latency_seconds` and `latency_aggregated`.
#[derive(Debug, Clone)]
pub struct Querier {
    db: Db,
}

impl Querier {
    /// Create a querier over `db`.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// All raw and aggregated entries matching `filter`.
    ///
    /// Raw entries come back ordered by `(timestamp, monitor, server)`;
    /// aggregated entries by `(start_timestamp, monitor, server)`.
    pub async fn get_entries(
        &self,
        filter: &LatencyFilter,
    ) -> Result<(Vec<Sample>, Vec<AggregatedSample>)> {
        Ok((
            self.raw_entries(filter).await?,
            self.aggregated_entries(filter).await?,
        ))
    }

    /// One summary pooling everything matching `filter`: the SQL-side
    /// aggregate of the raw table combined with every matching aggregated
    /// row. `None` when no observation matches at all.
    pub async fn get_statistics(&self, filter: &LatencyFilter) -> Result<Option<AggregatedSample>> {
        let mut accumulator = StatisticsAccumulator::new();

        if let Some(raw) = self.raw_statistics(filter).await? {
            accumulator.push_summary(raw.count, raw.mean, raw.variance, raw.minimum, raw.maximum);
        }

        for entry in self.aggregated_entries(filter).await? {
            accumulator.push_summary(
                u64::from(entry.number_samples),
                entry.mean_latency_micros,
                entry.variance_latency_micros,
                entry.minimum_latency_micros,
                entry.maximum_latency_micros,
            );
        }

        let Some(stats) = accumulator.finish() else {
            return Ok(None);
        };

        // The pooled summary spans the query bounds rather than any single
        // aggregation window, and carries no representative observation.
        Ok(Some(AggregatedSample {
            sample: Sample {
                monitor_id: filter.monitor_id.unwrap_or(MonitorId::new(0)),
                server_id: filter.server_id.unwrap_or(ServerId::new(0)),
                zoran_timestamp: 0,
                latency_micros: 0,
            },
            start_zoran_timestamp: to_zoran(filter.start_timestamp.unwrap_or(0)),
            end_zoran_timestamp: to_zoran(filter.end_timestamp.unwrap_or(u64::MAX)),
            mean_latency_micros: stats.mean,
            variance_latency_micros: stats.variance,
            minimum_latency_micros: stats.minimum,
            maximum_latency_micros: stats.maximum,
            number_samples: u32::try_from(stats.number_samples).unwrap_or(u32::MAX),
        }))
    }

    async fn raw_entries(&self, filter: &LatencyFilter) -> Result<Vec<Sample>> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT monitor_id, server_id, timestamp, latency FROM latency_seconds");
        filter.push_where(&mut builder);
        builder.push(" ORDER BY timestamp ASC, monitor_id ASC, server_id ASC");

        let rows = builder.build().fetch_all(self.db.pool()).await?;

        Ok(rows
            .iter()
            .map(|r| Sample {
                monitor_id: MonitorId::new(r.get::<i64, _>("monitor_id") as u32),
                server_id: ServerId::new(r.get::<i64, _>("server_id") as u16),
                zoran_timestamp: r.get::<i64, _>("timestamp") as u32,
                latency_micros: r.get::<i64, _>("latency") as u32,
            })
            .collect())
    }

    async fn aggregated_entries(&self, filter: &LatencyFilter) -> Result<Vec<AggregatedSample>> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT monitor_id, server_id, timestamp, latency, start_timestamp, \
             end_timestamp, mean_latency, variance_latency, minimum_latency, \
             maximum_latency, number_samples FROM latency_aggregated",
        );
        filter.push_where(&mut builder);
        builder.push(" ORDER BY start_timestamp ASC, monitor_id ASC, server_id ASC");

        let rows = builder.build().fetch_all(self.db.pool()).await?;

        Ok(rows
            .iter()
            .map(|r| AggregatedSample {
                sample: Sample {
                    monitor_id: MonitorId::new(r.get::<i64, _>("monitor_id") as u32),
                    server_id: ServerId::new(r.get::<i64, _>("server_id") as u16),
                    zoran_timestamp: r.get::<i64, _>("timestamp") as u32,
                    latency_micros: r.get::<i64, _>("latency") as u32,
                },
                start_zoran_timestamp: r.get::<i64, _>("start_timestamp") as u32,
                end_zoran_timestamp: r.get::<i64, _>("end_timestamp") as u32,
                mean_latency_micros: r.get("mean_latency"),
                variance_latency_micros: r.get("variance_latency"),
                minimum_latency_micros: r.get::<i64, _>("minimum_latency") as u32,
                maximum_latency_micros: r.get::<i64, _>("maximum_latency") as u32,
                number_samples: r.get::<i64, _>("number_samples") as u32,
            })
            .collect())
    }

    /// SQL-side population statistics of the matching raw rows.
    /// Population variance is `E[x²] − E[x]²`.
    async fn raw_statistics(&self, filter: &LatencyFilter) -> Result<Option<RawStatistics>> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT AVG(latency) AS average, \
             AVG(latency * latency) AS mean_square, \
             MIN(latency) AS minimum, \
             MAX(latency) AS maximum, \
             COUNT(latency) AS sample_size FROM latency_seconds",
        );
        filter.push_where(&mut builder);

        let row = builder.build().fetch_one(self.db.pool()).await?;

        let count: i64 = row.get("sample_size");
        if count == 0 {
            return Ok(None);
        }

        let mean: f64 = row.get("average");
        let mean_square: f64 = row.get("mean_square");

        Ok(Some(RawStatistics {
            count: count as u64,
            mean,
            variance: (mean_square - mean * mean).max(0.0),
            minimum: row.get::<i64, _>("minimum") as u32,
            maximum: row.get::<i64, _>("maximum") as u32,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct RawStatistics {
    count: u64,
    mean: f64,
    variance: f64,
    minimum: u32,
    maximum: u32,
}
