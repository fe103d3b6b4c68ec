//! The buffered write path into the raw latency table.
//!
//! ## Write Reordering
//!
//! Producers (HTTP upload handlers) append to a per-region in-memory queue
//! and never block on the database. Within one region, samples are
//! persisted in FIFO arrival order, which is not necessarily wall-clock
//! sample order — polling workers batch and retry, so their uploads can
//! arrive out of order. Across regions no ordering is guaranteed at all.
//! The aggregator's `ORDER BY` re-establishes a total order on read.
//!
//! ## Delivery semantics
//!
//! A failed sub-batch is retried forever without advancing, so every
//! accepted sample reaches the database at least once; the primary key on
//! `(monitor_id, server_id, timestamp)` plus `ON CONFLICT DO NOTHING`
//! makes redelivery (and worker-side upload retries) collapse to at most
//! one row.

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

mod region;
mod router;

pub use region::{IngestConfig, RegionIngestor};
pub use router::IngestRouter;
