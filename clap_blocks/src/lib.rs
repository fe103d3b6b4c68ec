//! CLI/env configuration blocks for the pulse daemon, grouped per
//! concern so the binary just flattens what it needs.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(clippy::clone_on_ref_ptr, clippy::dbg_macro, clippy::todo, missing_docs)]

pub mod aggregation;
pub mod database;
pub mod http;
pub mod ingest;
pub mod outbound;
