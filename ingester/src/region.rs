//! One region's ingest queue and its background bulk committer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use catalog::Db;
use data_types::{RegionId, Sample, MAX_LATENCY_MICROS};
use parking_lot::Mutex;
use sqlx::Row;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tuning knobs for a [`RegionIngestor`].
///
/// The defaults reproduce the production cadence: a 10 s queue check, a
/// forced flush after ≈5 minutes with data queued, 8 M cached entries
/// before a length-triggered flush, 100-row transactions, and a 30 s pause
/// before retrying a failed transaction.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// How long the worker sleeps between queue inspections.
    pub queue_check_interval: Duration,
    /// Number of check intervals with data queued before a flush is forced.
    pub cycles_before_forced_commit: u32,
    /// Queue length that triggers an immediate flush.
    pub max_cached_entries: usize,
    /// Rows committed per database transaction.
    pub max_rows_per_transaction: usize,
    /// Pause before retrying a failed transaction.
    pub retry_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_check_interval: Duration::from_secs(10),
            cycles_before_forced_commit: 30,
            max_cached_entries: 8_000_000,
            max_rows_per_transaction: 100,
            retry_interval: Duration::from_secs(30),
        }
    }
}

impl IngestConfig {
    fn forced_commit_after(&self) -> Duration {
        self.queue_check_interval * self.cycles_before_forced_commit
    }
}

/// Owns the write path into `latency_seconds` for exactly one region.
///
/// [`enqueue`](Self::enqueue) is non-blocking and safe from any task; a
/// single long-lived worker drains the queue in bulk. Producers are never
/// throttled — when the queue overshoots `max_cached_entries` the worker
/// flushes as fast as the database allows, trading bounded memory for
/// never refusing worker data.
#[derive(Debug)]
pub struct RegionIngestor {
    region_id: RegionId,
    queue: Arc<Mutex<Vec<Sample>>>,
    kick: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RegionIngestor {
    /// Create the ingestor for `region_id` and spawn its worker. The worker
    /// runs until `shutdown` is cancelled, then drains the queue with one
    /// final flush.
    pub fn new(db: Db, region_id: RegionId, config: IngestConfig, shutdown: CancellationToken) -> Self {
        let queue = Arc::new(Mutex::new(Vec::new()));
        let kick = Arc::new(Notify::new());

        let worker = Worker {
            db,
            region_id,
            config,
            queue: Arc::clone(&queue),
            kick: Arc::clone(&kick),
            shutdown,
        };
        let handle = tokio::spawn(worker.run());

        Self {
            region_id,
            queue,
            kick,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// The region this ingestor writes for.
    pub fn region_id(&self) -> RegionId {
        self.region_id
    }

    /// Append one sample to the in-memory queue. Never blocks on I/O.
    pub fn enqueue(&self, sample: Sample) {
        self.queue.lock().push(sample);
    }

    /// Append a batch of samples to the in-memory queue.
    pub fn enqueue_many(&self, samples: impl IntoIterator<Item = Sample>) {
        self.queue.lock().extend(samples);
    }

    /// Wake the worker so it inspects the queue promptly instead of at the
    /// next check interval.
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    /// Samples currently queued (primarily for tests and introspection).
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Wait for the worker to exit. Call after cancelling the shutdown
    /// token handed to [`new`](Self::new).
    pub async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(region_id = %self.region_id, error = %e, "ingest worker panicked");
            }
        }
    }
}

struct Worker {
    db: Db,
    region_id: RegionId,
    config: IngestConfig,
    queue: Arc<Mutex<Vec<Sample>>>,
    kick: Arc<Notify>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let forced_after = self.config.forced_commit_after();
        let mut oldest_pending = Instant::now();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.queue_check_interval) => {}
                _ = self.kick.notified() => {}
                _ = self.shutdown.cancelled() => break,
            }

            let queued = self.queue.lock().len();
            if queued == 0 {
                // Nothing pending; the forced-commit horizon starts when
                // data next appears.
                oldest_pending = Instant::now();
                continue;
            }

            if queued >= self.config.max_cached_entries || oldest_pending.elapsed() >= forced_after {
                self.flush().await;
                oldest_pending = Instant::now();
            }
        }

        // Shutdown: drain whatever is left.
        self.flush().await;
    }

    /// Swap the live queue for a fresh one and commit the captured batch in
    /// sub-batches, retrying each failed sub-batch forever.
    async fn flush(&self) {
        let batch = std::mem::take(&mut *self.queue.lock());
        if batch.is_empty() {
            return;
        }

        info!(
            region_id = %self.region_id,
            samples = batch.len(),
            "flushing latency samples"
        );

        let mut base = 0;
        while base < batch.len() {
            let upper = (base + self.config.max_rows_per_transaction).min(batch.len());
            match self.commit(&batch[base..upper]).await {
                Ok(()) => base = upper,
                Err(e) => {
                    warn!(
                        region_id = %self.region_id,
                        error = %e,
                        retry_in = ?self.config.retry_interval,
                        "latency insert failed, retrying sub-batch"
                    );
                    tokio::time::sleep(self.config.retry_interval).await;
                }
            }
        }
    }

    /// Commit one sub-batch inside a transaction. The valid monitor and
    /// server id sets are re-read per transaction so rows racing an admin
    /// delete are dropped rather than failing the whole batch.
    async fn commit(&self, samples: &[Sample]) -> Result<(), sqlx::Error> {
        let mut tx = self.db.pool().begin().await?;

        let valid_monitors: HashSet<i64> = sqlx::query("SELECT monitor_id FROM monitor")
            .fetch_all(&mut tx)
            .await?
            .iter()
            .map(|r| r.get::<i64, _>("monitor_id"))
            .collect();

        let valid_servers: HashSet<i64> = sqlx::query("SELECT server_id FROM servers")
            .fetch_all(&mut tx)
            .await?
            .iter()
            .map(|r| r.get::<i64, _>("server_id"))
            .collect();

        for sample in samples {
            let monitor_id = i64::from(sample.monitor_id.get());
            let server_id = i64::from(sample.server_id.get());

            if sample.latency_micros > MAX_LATENCY_MICROS
                || !valid_monitors.contains(&monitor_id)
                || !valid_servers.contains(&server_id)
            {
                // Workers can legitimately race ahead of catalog edits, and
                // >60 s readings are bad data; both drop silently.
                debug!(
                    monitor_id = %sample.monitor_id,
                    server_id = %sample.server_id,
                    latency_micros = sample.latency_micros,
                    "dropping invalid latency sample"
                );
                continue;
            }

            sqlx::query(
                "INSERT INTO latency_seconds (monitor_id, server_id, timestamp, latency) \
                 VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(monitor_id)
            .bind(server_id)
            .bind(i64::from(sample.zoran_timestamp))
            .bind(i64::from(sample.latency_micros))
            .execute(&mut tx)
            .await?;
        }

        tx.commit().await
    }
}
