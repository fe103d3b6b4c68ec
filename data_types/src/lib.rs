//! Shared value types used across the pulse latency controller.
//!
//! Everything in this crate is a plain value: typed ids, latency samples,
//! the Zoran↔Unix time conversion, server status/telemetry records, the
//! customer capability bitset, and the pooled-statistics accumulator shared
//! by the aggregator and the query layer.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::todo,
    clippy::use_self,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs
)]

mod capabilities;
mod sample;
mod stats;
mod zoran;

pub use capabilities::CustomerCapabilities;
pub use sample::{AggregatedSample, Sample, ShortSample, MAX_LATENCY_MICROS};
pub use stats::{PooledStatistics, StatisticsAccumulator};
pub use zoran::{to_unix, to_zoran, ZORAN_EPOCH_OFFSET};

/// Unique id of a customer account. `0` is never a valid customer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CustomerId(u32);

/// Unique id of a monitor (one probe definition). `0` is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonitorId(u32);

/// Unique id of a polling server. `0` is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerId(u16);

/// Unique id of a geographic region. `0` is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(u16);

/// Unique id of a host/scheme (one URL authority owned by a customer).
/// `0` is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostSchemeId(u32);

macro_rules! impl_id {
    ($name:ident, $raw:ty) => {
        impl $name {
            /// Wrap a raw id. The caller is responsible for ensuring the id
            /// refers to an existing catalog row; `0` is the invalid
            /// sentinel and never matches one.
            pub const fn new(v: $raw) -> Self {
                Self(v)
            }

            /// The raw integer value.
            pub const fn get(&self) -> $raw {
                self.0
            }

            /// Whether this id is a plausible catalog reference (non-zero).
            pub const fn is_valid(&self) -> bool {
                self.0 != 0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

impl_id!(CustomerId, u32);
impl_id!(MonitorId, u32);
impl_id!(ServerId, u16);
impl_id!(RegionId, u16);
impl_id!(HostSchemeId, u32);

/// Reported liveness state of a polling server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerStatus {
    /// The server has never reported, or its state cannot be determined.
    Unknown,
    /// The server is polling monitors.
    Active,
    /// The server is provisioned but not currently polling.
    Inactive,
    /// The server has been withdrawn from service.
    Defunct,
}

impl ServerStatus {
    /// Decode the single-byte wire value used in worker uploads.
    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Unknown),
            1 => Some(Self::Active),
            2 => Some(Self::Inactive),
            3 => Some(Self::Defunct),
            _ => None,
        }
    }

    /// The catalog string form, as stored in the `servers` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Defunct => "DEFUNCT",
        }
    }

    /// Parse the catalog string form.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "UNKNOWN" => Some(Self::Unknown),
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            "DEFUNCT" => Some(Self::Defunct),
            _ => None,
        }
    }
}

/// A polling server as recorded in the servers catalog.
///
/// `monitors_per_second`, `cpu_loading` and `memory_loading` are telemetry
/// reported by the server itself on each upload; loadings are fractions in
/// `[0, 1]` (CPU loading may exceed 1.0 on an oversubscribed host).
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    /// Catalog id of this server.
    pub server_id: ServerId,
    /// Region this server polls from.
    pub region_id: RegionId,
    /// Stable textual identifier the server reports in uploads.
    pub identifier: String,
    /// Last reported liveness state.
    pub status: ServerStatus,
    /// Last reported service rate, in monitors per second.
    pub monitors_per_second: f32,
    /// Last reported CPU loading.
    pub cpu_loading: f32,
    /// Last reported memory loading.
    pub memory_loading: f32,
}

/// A geographic region as recorded in the regions catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Catalog id of this region.
    pub region_id: RegionId,
    /// Human-readable region name.
    pub name: String,
}

/// A monitor as recorded in the monitor catalog.
///
/// Only the fields the latency pipeline consumes are carried here; the admin
/// surface owns the full probe definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Monitor {
    /// Catalog id of this monitor.
    pub monitor_id: MonitorId,
    /// Owning customer.
    pub customer_id: CustomerId,
    /// Host/scheme this monitor probes.
    pub host_scheme_id: HostSchemeId,
}
