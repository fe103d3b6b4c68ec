//! Injectable wall-clock time for pulse.
//!
//! Long-running components (the aggregator's retention arithmetic, the
//! ingestor's forced-flush horizon) never call the system clock directly;
//! they hold an `Arc<dyn TimeProvider>` so tests can drive time explicitly.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::todo,
    missing_debug_implementations,
    missing_docs
)]

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

/// A source of "now".
pub trait TimeProvider: std::fmt::Debug + Send + Sync + 'static {
    /// The current time as Unix seconds.
    fn now_unix(&self) -> u64;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProvider;

impl SystemProvider {
    /// Create a provider backed by the system clock.
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemProvider {
    fn now_unix(&self) -> u64 {
        let secs = Utc::now().timestamp();
        u64::try_from(secs).unwrap_or(0)
    }
}

/// A clock that only moves when told to. For tests.
#[derive(Debug)]
pub struct MockProvider {
    now: Mutex<u64>,
}

impl MockProvider {
    /// Create a mock clock pinned to `now` (Unix seconds).
    pub fn new(now: u64) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    /// Pin the clock to an absolute time.
    pub fn set(&self, now: u64) {
        *self.now.lock() = now;
    }

    /// Advance the clock by `seconds`.
    pub fn advance(&self, seconds: u64) {
        *self.now.lock() += seconds;
    }
}

impl TimeProvider for MockProvider {
    fn now_unix(&self) -> u64 {
        *self.now.lock()
    }
}
