//! The HTTP surface.
//!
//! One binary endpoint receives worker uploads; the JSON endpoints serve
//! operators (`latency/*`) and customers (`v1/latency/*`). Authentication
//! is performed by the fronting framework; everything here assumes the
//! request has already been admitted.
//!
//! Error convention: a malformed envelope (not JSON, wrong shape, bad
//! binary framing) is an empty HTTP 400; a request that parses but names
//! invalid values or fails downstream answers HTTP 200 with a
//! human-readable `status` string.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use data_types::{AggregatedSample, Monitor, MonitorId, Sample, Server, ServerId};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::state::AppState;

mod customer;
mod latency;
pub mod wire;

/// Build the API router over the composed application.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/latency/record", post(latency::record))
        .route("/latency/get", post(latency::get))
        .route("/latency/statistics", post(latency::statistics))
        .route("/latency/purge", post(latency::purge))
        .route("/latency/plot", post(latency::plot))
        .route("/v1/latency/list", post(customer::list))
        .route("/v1/latency/plot", post(customer::plot))
        .with_state(state)
}

/// An empty HTTP 400, used for every envelope-level rejection.
pub(crate) fn bad_request() -> Response {
    StatusCode::BAD_REQUEST.into_response()
}

/// An HTTP 200 with a bare `status` string.
pub(crate) fn status_response(status: &str) -> Response {
    Json(json!({ "status": status })).into_response()
}

/// Decode a JSON request body, mapping any shape mismatch to an empty 400.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|_| bad_request())
}

/// Which attribution fields responses carry. Operators see everything;
/// customers see region attribution but not the server fleet or their own
/// id echoed back.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Attribution {
    pub include_server_id: bool,
    pub include_region_id: bool,
    pub include_customer_id: bool,
}

impl Attribution {
    pub(crate) const OPERATOR: Self = Self {
        include_server_id: true,
        include_region_id: true,
        include_customer_id: true,
    };

    pub(crate) const CUSTOMER: Self = Self {
        include_server_id: false,
        include_region_id: true,
        include_customer_id: false,
    };
}

/// Catalog dumps used to attribute response rows.
pub(crate) struct AttributionMaps {
    pub servers: HashMap<ServerId, Server>,
    pub monitors: HashMap<MonitorId, Monitor>,
}

impl std::fmt::Debug for AttributionMaps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributionMaps")
            .field("servers", &self.servers.len())
            .field("monitors", &self.monitors.len())
            .finish()
    }
}

impl AttributionMaps {
    /// Load both catalog dumps; failures log and yield empty maps so a
    /// response can still be produced without attribution.
    pub(crate) async fn load(state: &AppState) -> Self {
        let servers = state.servers.all().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load servers for response attribution");
            HashMap::new()
        });
        let monitors = state.monitors.all().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load monitors for response attribution");
            HashMap::new()
        });

        Self { servers, monitors }
    }
}

/// One raw sample as response JSON; latencies in seconds, timestamps in
/// Unix seconds.
pub(crate) fn sample_to_json(
    sample: &Sample,
    maps: &AttributionMaps,
    attribution: Attribution,
) -> serde_json::Value {
    let mut value = json!({
        "monitor_id": sample.monitor_id.get(),
        "timestamp": sample.unix_timestamp(),
        "latency": sample.latency_seconds(),
    });
    let object = value.as_object_mut().expect("built from an object literal");

    if attribution.include_server_id {
        object.insert("server_id".to_owned(), json!(sample.server_id.get()));
    }

    if attribution.include_region_id {
        let region_id = maps
            .servers
            .get(&sample.server_id)
            .map(|s| s.region_id.get())
            .unwrap_or(0);
        object.insert("region_id".to_owned(), json!(region_id));
    }

    if attribution.include_customer_id {
        let customer_id = maps
            .monitors
            .get(&sample.monitor_id)
            .map(|m| m.customer_id.get())
            .unwrap_or(0);
        object.insert("customer_id".to_owned(), json!(customer_id));
    }

    value
}

/// One aggregated sample as response JSON; variance in seconds².
pub(crate) fn aggregated_to_json(
    entry: &AggregatedSample,
    maps: &AttributionMaps,
    attribution: Attribution,
) -> serde_json::Value {
    let mut value = sample_to_json(&entry.sample, maps, attribution);
    let object = value.as_object_mut().expect("built from an object literal");

    object.insert("average".to_owned(), json!(entry.mean_latency_micros * 1.0e-6));
    object.insert(
        "variance".to_owned(),
        json!(entry.variance_latency_micros * 1.0e-12),
    );
    object.insert(
        "minimum".to_owned(),
        json!(f64::from(entry.minimum_latency_micros) * 1.0e-6),
    );
    object.insert(
        "maximum".to_owned(),
        json!(f64::from(entry.maximum_latency_micros) * 1.0e-6),
    );
    object.insert("number_samples".to_owned(), json!(entry.number_samples));
    object.insert(
        "start_timestamp".to_owned(),
        json!(entry.start_unix_timestamp()),
    );
    object.insert("end_timestamp".to_owned(), json!(entry.end_unix_timestamp()));

    value
}

/// Validate an optional JSON number as a 32-bit id.
pub(crate) fn id_u32(value: Option<f64>, what: &str) -> Result<Option<u32>, String> {
    match value {
        None => Ok(None),
        Some(v) if v > 0.0 && v <= f64::from(u32::MAX) => Ok(Some(v as u32)),
        Some(_) => Err(format!("failed, invalid {what}")),
    }
}

/// Validate an optional JSON number as a 16-bit id.
pub(crate) fn id_u16(value: Option<f64>, what: &str) -> Result<Option<u16>, String> {
    match value {
        None => Ok(None),
        Some(v) if v > 0.0 && v <= f64::from(u16::MAX) => Ok(Some(v as u16)),
        Some(_) => Err(format!("failed, invalid {what}")),
    }
}

/// Validate an optional JSON number as a Unix timestamp.
pub(crate) fn timestamp(value: Option<f64>, what: &str) -> Result<Option<u64>, String> {
    match value {
        None => Ok(None),
        Some(v) if v >= 0.0 => Ok(Some(v as u64)),
        Some(_) => Err(format!("failed, invalid {what}")),
    }
}
