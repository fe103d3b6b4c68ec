//! Operator-facing latency endpoints.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use data_types::{CustomerId, MonitorId, RegionId, Sample, ServerId, HostSchemeId};
use dispatcher::Request as OutboundRequest;
use plotter::layout::{clamp_dimension, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use plotter::{
    FontSpec, HistogramPlotRequest, HistoryPlotRequest, ImageFormat, PlotStyle,
};
use querier::LatencyFilter;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::state::AppState;

use super::{
    aggregated_to_json, bad_request, id_u16, id_u32, parse_body, sample_to_json, status_response,
    timestamp, Attribution, AttributionMaps,
};
use super::wire::{decode_upload, WireError};

/// POST `/latency/record` — the binary worker upload.
pub(super) async fn record(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let (header, entries) = match decode_upload(&body) {
        Ok(decoded) => decoded,
        Err(e @ (WireError::TooShort(_) | WireError::Misaligned(_))) => {
            warn!(error = %e, "rejecting malformed upload body");
            return bad_request();
        }
    };

    let identifier = header.identifier();
    let mut server = match state.servers.get_by_identifier(&identifier).await {
        Ok(Some(server)) => server,
        Ok(None) => return status_response("failed, unknown server"),
        Err(e) => {
            warn!(error = %e, %identifier, "server lookup failed during upload");
            return status_response("failed, unknown server");
        }
    };

    let Some(status) = header.status() else {
        return status_response("failed, invalid server status code");
    };

    let telemetry_changed = server.status != status
        || server.cpu_loading != header.cpu_loading
        || server.memory_loading != header.memory_loading
        || server.monitors_per_second != header.monitors_per_second;
    if telemetry_changed {
        server.status = status;
        server.cpu_loading = header.cpu_loading;
        server.memory_loading = header.memory_loading;
        server.monitors_per_second = header.monitors_per_second;

        if let Err(e) = state.servers.update_telemetry(&server).await {
            warn!(error = %e, %identifier, "failed to persist server telemetry");
            return status_response("failed, could not update server status");
        }
    }

    let sample_count = entries.len();
    let samples = entries.into_iter().map(|entry| Sample {
        monitor_id: MonitorId::new(entry.monitor_id),
        server_id: server.server_id,
        zoran_timestamp: entry.zoran_timestamp,
        latency_micros: entry.latency_micros,
    });
    state.ingest.add_entries(server.region_id, samples);

    info!(
        %identifier,
        status = status.as_str(),
        cpu = f64::from(header.cpu_loading),
        memory = f64::from(header.memory_loading),
        rate = f64::from(header.monitors_per_second),
        samples = sample_count,
        "received worker upload"
    );

    status_response("OK")
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct FilterRequest {
    customer_id: Option<f64>,
    monitor_id: Option<f64>,
    host_scheme_id: Option<f64>,
    server_id: Option<f64>,
    region_id: Option<f64>,
    start_timestamp: Option<f64>,
    end_timestamp: Option<f64>,
}

impl FilterRequest {
    pub(super) fn to_filter(&self) -> Result<LatencyFilter, String> {
        Ok(LatencyFilter {
            customer_id: id_u32(self.customer_id, "customer ID")?.map(CustomerId::new),
            monitor_id: id_u32(self.monitor_id, "monitor ID")?.map(MonitorId::new),
            host_scheme_id: id_u32(self.host_scheme_id, "host/scheme ID")?.map(HostSchemeId::new),
            server_id: id_u16(self.server_id, "server ID")?.map(ServerId::new),
            region_id: id_u16(self.region_id, "region ID")?.map(RegionId::new),
            start_timestamp: timestamp(self.start_timestamp, "start timestamp")?,
            end_timestamp: timestamp(self.end_timestamp, "end timestamp")?,
        })
    }
}

/// POST `/latency/get` — raw and aggregated entries.
pub(super) async fn get(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: FilterRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let filter = match request.to_filter() {
        Ok(filter) => filter,
        Err(status) => return status_response(&status),
    };

    // Query failures surface as "no data" rather than request failures.
    let (raw, aggregated) = state.querier.get_entries(&filter).await.unwrap_or_else(|e| {
        warn!(error = %e, "latency query failed");
        (Vec::new(), Vec::new())
    });

    let maps = AttributionMaps::load(&state).await;
    let recent: Vec<_> = raw
        .iter()
        .map(|s| sample_to_json(s, &maps, Attribution::OPERATOR))
        .collect();
    let aggregated: Vec<_> = aggregated
        .iter()
        .map(|e| aggregated_to_json(e, &maps, Attribution::OPERATOR))
        .collect();

    Json(json!({
        "status": "OK",
        "recent": recent,
        "aggregated": aggregated,
    }))
    .into_response()
}

/// POST `/latency/statistics` — pooled statistics over everything
/// matching the filter.
pub(super) async fn statistics(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: FilterRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let filter = match request.to_filter() {
        Ok(filter) => filter,
        Err(status) => return status_response(&status),
    };

    let stats = match state.querier.get_statistics(&filter).await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(error = %e, "latency statistics query failed");
            None
        }
    };

    match stats {
        Some(stats) => Json(json!({
            "status": "OK",
            "statistics": {
                "mean": stats.mean_latency_micros * 1.0e-6,
                "variance": stats.variance_latency_micros * 1.0e-12,
                "minimum": f64::from(stats.minimum_latency_micros) * 1.0e-6,
                "maximum": f64::from(stats.maximum_latency_micros) * 1.0e-6,
                "number_samples": stats.number_samples,
            },
        }))
        .into_response(),
        None => status_response("failed"),
    }
}

/// POST `/latency/purge` — delete all latency data for a set of
/// customers. The body is a JSON array of customer ids.
pub(super) async fn purge(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let ids: Vec<f64> = match parse_body(&body) {
        Ok(ids) => ids,
        Err(response) => return response,
    };

    let mut customer_ids = BTreeSet::new();
    for id in &ids {
        match id_u32(Some(*id), "customer ID") {
            Ok(Some(id)) => {
                customer_ids.insert(CustomerId::new(id));
            }
            _ => return status_response("failed, invalid customer ID"),
        }
    }
    if customer_ids.len() != ids.len() {
        return status_response("failed, duplicate customer ID");
    }

    if let Err(e) = state.aggregator.delete_by_customer(&customer_ids).await {
        warn!(error = %e, "latency purge failed");
        return status_response("failed");
    }

    // Fire-and-forget: the dispatcher owns ordering and retries.
    if let Some(authority) = &state.website_authority {
        let ids: Vec<u32> = customer_ids.iter().map(|id| id.get()).collect();
        state.dispatcher.post(
            authority,
            OutboundRequest::new(
                "/customer/latency_purged",
                json!({ "customer_ids": ids }),
                format!("latency purge of {} customers", ids.len()),
            ),
        );
    }

    status_response("OK")
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct PlotRequest {
    customer_id: Option<f64>,
    monitor_id: Option<f64>,
    host_scheme_id: Option<f64>,
    server_id: Option<f64>,
    region_id: Option<f64>,
    start_timestamp: Option<f64>,
    end_timestamp: Option<f64>,
    plot_type: Option<String>,
    title: Option<String>,
    x_axis_label: Option<String>,
    y_axis_label: Option<String>,
    date_format: Option<String>,
    title_font: Option<String>,
    axis_title_font: Option<String>,
    axis_label_font: Option<String>,
    minimum_latency: Option<f64>,
    maximum_latency: Option<f64>,
    log_scale: Option<bool>,
    width: Option<f64>,
    height: Option<f64>,
    format: Option<String>,
}

pub(super) enum PlotKind {
    History(HistoryPlotRequest),
    Histogram(HistogramPlotRequest),
}

impl PlotRequest {
    /// The raw requested customer id, for the customer API's gate.
    pub(super) fn customer_id(&self) -> Option<f64> {
        self.customer_id
    }

    /// Validate and assemble the render request. `force_customer` pins the
    /// filter to one customer and removes server visibility (the customer
    /// API restriction); operators pass `None`.
    pub(super) fn to_plot(&self, force_customer: Option<CustomerId>) -> Result<PlotKind, String> {
        let mut filter = LatencyFilter {
            customer_id: id_u32(self.customer_id, "customer ID")
                .unwrap_or_default()
                .map(CustomerId::new),
            monitor_id: id_u32(self.monitor_id, "monitor ID")?.map(MonitorId::new),
            host_scheme_id: id_u32(self.host_scheme_id, "host/scheme ID")?.map(HostSchemeId::new),
            server_id: id_u16(self.server_id, "server ID")
                .unwrap_or_default()
                .map(ServerId::new),
            region_id: id_u16(self.region_id, "region ID")?.map(RegionId::new),
            start_timestamp: timestamp(self.start_timestamp, "start timestamp")?,
            end_timestamp: timestamp(self.end_timestamp, "end timestamp")?,
        };
        if let Some(customer_id) = force_customer {
            filter.customer_id = Some(customer_id);
            filter.server_id = None;
        }

        let plot_type = self
            .plot_type
            .as_deref()
            .unwrap_or("history")
            .to_lowercase();

        let histogram = match plot_type.as_str() {
            "history" => false,
            "histogram" => true,
            _ => return Err("invalid plot type".to_owned()),
        };

        let width = match self.width {
            None => DEFAULT_WIDTH,
            Some(v) if (100.0..=2048.0).contains(&v) => clamp_dimension(v as u32),
            Some(_) => return Err("failed, invalid width".to_owned()),
        };
        let height = match self.height {
            None => DEFAULT_HEIGHT,
            Some(v) if (100.0..=2048.0).contains(&v) => clamp_dimension(v as u32),
            Some(_) => return Err("failed, invalid height".to_owned()),
        };

        let format = match &self.format {
            None => ImageFormat::Png,
            Some(subtype) => {
                ImageFormat::from_subtype(subtype).ok_or("failed, invalid format".to_owned())?
            }
        };

        let (default_title, default_x, default_y) = if histogram {
            ("Latency Histogram", "Latency (seconds)", "Counts")
        } else {
            ("Latency Over Time", "Date/Time", "Latency (seconds)")
        };

        let style = PlotStyle {
            title: self.title.clone().unwrap_or_else(|| default_title.to_owned()),
            x_axis_label: self
                .x_axis_label
                .clone()
                .unwrap_or_else(|| default_x.to_owned()),
            y_axis_label: self
                .y_axis_label
                .clone()
                .unwrap_or_else(|| default_y.to_owned()),
            // An unparseable font description keeps the built-in default.
            title_font: self.title_font.as_deref().and_then(FontSpec::parse),
            axis_title_font: self.axis_title_font.as_deref().and_then(FontSpec::parse),
            axis_label_font: self.axis_label_font.as_deref().and_then(FontSpec::parse),
            width,
            height,
            format,
        };

        let minimum_latency = self.minimum_latency.unwrap_or(-1.0);
        let maximum_latency = self.maximum_latency.unwrap_or(-1.0);

        Ok(if histogram {
            PlotKind::Histogram(HistogramPlotRequest {
                filter,
                style,
                minimum_latency,
                maximum_latency,
            })
        } else {
            PlotKind::History(HistoryPlotRequest {
                filter,
                style,
                date_format: self
                    .date_format
                    .clone()
                    .unwrap_or_else(|| "%b %d %Y - %H:%M".to_owned()),
                minimum_latency,
                maximum_latency,
                log_scale: self.log_scale.unwrap_or(false),
            })
        })
    }
}

/// Run a validated plot request through the render worker and package the
/// outcome.
pub(super) async fn render_plot(state: &AppState, plot: PlotKind) -> Response {
    let context_id = state.next_plot_context();

    let (mailbox, format) = match plot {
        PlotKind::History(request) => {
            let format = request.style.format;
            (
                state.plotter.request_history_plot(context_id, request),
                format,
            )
        }
        PlotKind::Histogram(request) => {
            let format = request.style.format;
            (
                state.plotter.request_histogram_plot(context_id, request),
                format,
            )
        }
    };

    match mailbox.wait_for_image().await {
        Some(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, format.mime())],
            bytes,
        )
            .into_response(),
        None => status_response("failed, could not render plot"),
    }
}

/// POST `/latency/plot` — render a history or histogram chart.
pub(super) async fn plot(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: PlotRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match request.to_plot(None) {
        Ok(plot) => render_plot(&state, plot).await,
        Err(status) => status_response(&status),
    }
}
