//! Ingest tuning CLI config.

use std::time::Duration;

use ingester::IngestConfig;

/// Tuning for the per-region ingest workers. The defaults match the
/// production cadence; tests and small deployments can tighten them.
#[derive(Debug, Clone, clap::Parser)]
pub struct IngestTuningConfig {
    /// How often each region worker inspects its queue.
    #[clap(
        long = "ingest-queue-check-interval",
        env = "PULSE_INGEST_QUEUE_CHECK_INTERVAL",
        default_value = "10s",
        value_parser = humantime::parse_duration,
        action
    )]
    pub queue_check_interval: Duration,

    /// Check intervals with data queued before a flush is forced.
    #[clap(
        long = "ingest-cycles-before-forced-commit",
        env = "PULSE_INGEST_CYCLES_BEFORE_FORCED_COMMIT",
        default_value = "30",
        action
    )]
    pub cycles_before_forced_commit: u32,

    /// Queue length that triggers an immediate flush.
    #[clap(
        long = "ingest-max-cached-entries",
        env = "PULSE_INGEST_MAX_CACHED_ENTRIES",
        default_value = "8000000",
        action
    )]
    pub max_cached_entries: usize,

    /// Rows per insert transaction.
    #[clap(
        long = "ingest-max-rows-per-transaction",
        env = "PULSE_INGEST_MAX_ROWS_PER_TRANSACTION",
        default_value = "100",
        action
    )]
    pub max_rows_per_transaction: usize,

    /// Pause before retrying a failed insert transaction.
    #[clap(
        long = "ingest-retry-interval",
        env = "PULSE_INGEST_RETRY_INTERVAL",
        default_value = "30s",
        value_parser = humantime::parse_duration,
        action
    )]
    pub retry_interval: Duration,
}

impl From<&IngestTuningConfig> for IngestConfig {
    fn from(config: &IngestTuningConfig) -> Self {
        Self {
            queue_check_interval: config.queue_check_interval,
            cycles_before_forced_commit: config.cycles_before_forced_commit,
            max_cached_entries: config.max_cached_entries,
            max_rows_per_transaction: config.max_rows_per_transaction,
            retry_interval: config.retry_interval,
        }
    }
}
