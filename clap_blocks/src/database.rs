//! Database CLI config.

use std::path::PathBuf;

/// Where the controller database lives and how many connections may be
/// open at once.
#[derive(Debug, Clone, clap::Parser)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file. Created on first start.
    #[clap(
        long = "database-path",
        env = "PULSE_DATABASE_PATH",
        default_value = "pulse.sqlite",
        action
    )]
    pub database_path: PathBuf,

    /// Upper bound on pooled database connections.
    ///
    /// Request handlers, the per-region ingest workers, the aggregator and
    /// the render worker all draw from this pool; sizing it below the
    /// expected concurrency only queues work, it never fails it.
    #[clap(
        long = "database-max-connections",
        env = "PULSE_DATABASE_MAX_CONNECTIONS",
        default_value = "10",
        action
    )]
    pub max_connections: u32,
}
