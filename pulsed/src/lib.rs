//! The pulse daemon: HTTP surface and composition root for the latency
//! ingest, aggregation, query, and plotting pipeline.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations
)]

pub mod http;
pub mod state;
