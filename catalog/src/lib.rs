//! Database access and reference-data catalogs.
//!
//! All persisted state lives in one SQLite database behind a bounded
//! [`Db`] pool. The catalogs here are deliberately cache-free readers:
//! reference data changes rarely but must reflect admin edits immediately,
//! and the hot ingest path batches its own validity lookups per
//! transaction, so every call goes to the database.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::todo,
    missing_debug_implementations
)]

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

mod customers;
mod monitors;
mod regions;
mod schema;
mod servers;

pub use customers::Customers;
pub use monitors::Monitors;
pub use regions::Regions;
pub use schema::setup_schema;
pub use servers::Servers;

/// Errors from catalog and database operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying driver failed.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A stored value does not fit the domain type it maps to.
    #[error("malformed {column} value in {table} row")]
    MalformedRow {
        /// Table the row came from.
        table: &'static str,
        /// Offending column.
        column: &'static str,
    },
}

/// Convenience result alias for catalog operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A handle to the controller database.
///
/// Cloning is cheap; all clones share one bounded connection pool. Public
/// operations acquire and release a connection internally, so no caller can
/// leak a connection across a request boundary.
#[derive(Debug, Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    /// Open (creating if missing) the database at `path`.
    pub async fn connect(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// The underlying pool, for components that manage their own
    /// statements and transactions.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

pub(crate) fn id_u32(v: i64, table: &'static str, column: &'static str) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::MalformedRow { table, column })
}

pub(crate) fn id_u16(v: i64, table: &'static str, column: &'static str) -> Result<u16> {
    u16::try_from(v).map_err(|_| Error::MalformedRow { table, column })
}
