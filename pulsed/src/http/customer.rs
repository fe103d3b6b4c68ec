//! Customer-facing (v1) latency endpoints.
//!
//! Customers only ever see their own monitors, and never pick individual
//! servers: `customer_id` is mandatory, must belong to an active account
//! with latency tracking, and `server_id` is stripped from the filter.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use data_types::{CustomerId, HostSchemeId, MonitorId, RegionId};
use querier::LatencyFilter;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

use super::latency::{render_plot, PlotRequest};
use super::{
    aggregated_to_json, id_u16, id_u32, parse_body, sample_to_json, status_response, timestamp,
    Attribution, AttributionMaps,
};

/// Resolve and gate the requesting customer. `Err` carries the ready
/// failure response.
async fn admitted_customer(
    state: &AppState,
    customer_id: Option<f64>,
) -> Result<CustomerId, Response> {
    let customer_id = match id_u32(customer_id, "customer ID") {
        Ok(Some(id)) => CustomerId::new(id),
        Ok(None) => return Err(status_response("failed, customer ID is required")),
        Err(status) => return Err(status_response(&status)),
    };

    let capabilities = match state.customers.capabilities(customer_id).await {
        Ok(Some(capabilities)) => capabilities,
        Ok(None) => return Err(status_response("failed, unknown customer")),
        Err(e) => {
            warn!(error = %e, %customer_id, "capability lookup failed");
            return Err(status_response("failed, unknown customer"));
        }
    };

    if !capabilities.may_read_latency() {
        return Err(status_response("failed, latency tracking not available"));
    }

    Ok(customer_id)
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ListRequest {
    customer_id: Option<f64>,
    monitor_id: Option<f64>,
    host_scheme_id: Option<f64>,
    region_id: Option<f64>,
    start_timestamp: Option<f64>,
    end_timestamp: Option<f64>,
}

/// POST `/v1/latency/list` — a customer's raw and aggregated entries.
pub(super) async fn list(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: ListRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let customer_id = match admitted_customer(&state, request.customer_id).await {
        Ok(customer_id) => customer_id,
        Err(response) => return response,
    };

    let filter = LatencyFilter {
        customer_id: Some(customer_id),
        monitor_id: match id_u32(request.monitor_id, "monitor ID") {
            Ok(id) => id.map(MonitorId::new),
            Err(status) => return status_response(&status),
        },
        host_scheme_id: match id_u32(request.host_scheme_id, "host/scheme ID") {
            Ok(id) => id.map(HostSchemeId::new),
            Err(status) => return status_response(&status),
        },
        server_id: None,
        region_id: match id_u16(request.region_id, "region ID") {
            Ok(id) => id.map(RegionId::new),
            Err(status) => return status_response(&status),
        },
        start_timestamp: match timestamp(request.start_timestamp, "start timestamp") {
            Ok(t) => t,
            Err(status) => return status_response(&status),
        },
        end_timestamp: match timestamp(request.end_timestamp, "end timestamp") {
            Ok(t) => t,
            Err(status) => return status_response(&status),
        },
    };

    let (raw, aggregated) = state.querier.get_entries(&filter).await.unwrap_or_else(|e| {
        warn!(error = %e, %customer_id, "customer latency query failed");
        (Vec::new(), Vec::new())
    });

    let maps = AttributionMaps::load(&state).await;
    let recent: Vec<_> = raw
        .iter()
        .map(|s| sample_to_json(s, &maps, Attribution::CUSTOMER))
        .collect();
    let aggregated: Vec<_> = aggregated
        .iter()
        .map(|e| aggregated_to_json(e, &maps, Attribution::CUSTOMER))
        .collect();

    Json(json!({
        "status": "OK",
        "recent": recent,
        "aggregated": aggregated,
    }))
    .into_response()
}

/// POST `/v1/latency/plot` — a customer's chart, with server selection
/// stripped.
pub(super) async fn plot(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: PlotRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let customer_id = match admitted_customer(&state, request.customer_id()).await {
        Ok(customer_id) => customer_id,
        Err(response) => return response,
    };

    match request.to_plot(Some(customer_id)) {
        Ok(plot) => render_plot(&state, plot).await,
        Err(status) => status_response(&status),
    }
}
