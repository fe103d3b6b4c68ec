use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use data_types::{CustomerCapabilities, ServerStatus, ZORAN_EPOCH_OFFSET};
use dispatcher::DispatcherConfig;
use ingester::IngestConfig;
use pulse_tests::TestDb;
use pulse_time::MockProvider;
use pulsed::http;
use pulsed::state::AppState;
use tower::ServiceExt;

const E: u64 = ZORAN_EPOCH_OFFSET;

async fn test_app() -> (TestDb, Arc<AppState>, Router) {
    let fixture = TestDb::new().await;

    fixture.seed_region(1, "us-west").await;
    fixture.seed_server(3, 1, "198.51.100.7").await;
    fixture.seed_monitor(7, 20, 30).await;
    fixture
        .seed_customer(
            20,
            CustomerCapabilities::ACTIVE | CustomerCapabilities::LATENCY_TRACKING,
        )
        .await;

    let ingest_config = IngestConfig {
        queue_check_interval: Duration::from_millis(20),
        cycles_before_forced_commit: 2,
        retry_interval: Duration::from_millis(50),
        ..IngestConfig::default()
    };
    let dispatcher_config = DispatcherConfig {
        garbage_collect: false,
        ..DispatcherConfig::default()
    };

    let state = Arc::new(AppState::new(
        fixture.db.clone(),
        ingest_config,
        aggregator::Parameters::raw_tier(0, 3600, 10_000_000),
        dispatcher_config,
        MockProvider::new(E + 10_000),
        None,
    ));
    let app = http::router(Arc::clone(&state));

    (fixture, state, app)
}

async fn post(app: &Router, path: &str, body: impl Into<Vec<u8>>) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(body.into()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, bytes.to_vec())
}

async fn post_json(
    app: &Router,
    path: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let (status, bytes) = post(app, path, serde_json::to_vec(&body).unwrap()).await;
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

/// An upload body for the seeded server 198.51.100.7, reporting ACTIVE
/// with 0.5 CPU loading.
fn upload_body(entries: &[(u32, u32, u32)]) -> Vec<u8> {
    let mut body = vec![0_u8; 64];
    body[0] = 7;
    body[1] = 100;
    body[2] = 51;
    body[3] = 198;
    body[0x14..0x18].copy_from_slice(&384_u32.to_le_bytes());
    body[0x18..0x1A].copy_from_slice(&2048_u16.to_le_bytes());
    body[0x1A..0x1C].copy_from_slice(&16384_u16.to_le_bytes());
    body[0x1C] = 1;

    for &(monitor_id, timestamp, latency) in entries {
        body.extend_from_slice(&monitor_id.to_le_bytes());
        body.extend_from_slice(&timestamp.to_le_bytes());
        body.extend_from_slice(&latency.to_le_bytes());
    }

    body
}

#[tokio::test]
async fn record_rejects_malformed_framing() {
    let (_fixture, _state, app) = test_app().await;

    let (status, body) = post(&app, "/latency/record", vec![0_u8; 63]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.is_empty());

    let mut misaligned = upload_body(&[]);
    misaligned.extend_from_slice(&[0_u8; 13]);
    let (status, _) = post(&app, "/latency/record", misaligned).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn record_rejects_unknown_workers() {
    let (_fixture, _state, app) = test_app().await;

    let mut body = upload_body(&[]);
    // An address no server is registered under.
    body[0] = 1;
    let (status, value) = post(&app, "/latency/record", body).await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&value).unwrap();
    assert_eq!(value["status"], "failed, unknown server");
}

#[tokio::test]
async fn record_persists_samples_and_telemetry() {
    let (fixture, state, app) = test_app().await;

    let (status, value) = post(
        &app,
        "/latency/record",
        upload_body(&[(7, 1000, 500_000)]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&value).unwrap();
    assert_eq!(value["status"], "OK");

    // Draining the ingest queues commits the sample.
    state.ingest.shutdown().await;
    assert_eq!(fixture.raw_rows().await, vec![(7, 3, 1000, 500_000)]);

    // The header telemetry reached the servers catalog.
    let server = state
        .servers
        .get(data_types::ServerId::new(3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.status, ServerStatus::Active);
    assert_eq!(server.cpu_loading, 0.5);
    assert_eq!(server.memory_loading, 0.25);
    assert_eq!(server.monitors_per_second, 1.5);
}

#[tokio::test]
async fn get_rejects_unknown_keys_with_400() {
    let (_fixture, _state, app) = test_app().await;

    let (status, _) = post_json(
        &app,
        "/latency/get",
        serde_json::json!({ "monitor_id": 7, "bogus": true }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_reports_invalid_ids_in_band() {
    let (_fixture, _state, app) = test_app().await;

    let (status, value) = post_json(
        &app,
        "/latency/get",
        serde_json::json!({ "monitor_id": 0 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["status"], "failed, invalid monitor ID");
}

#[tokio::test]
async fn get_returns_attributed_entries() {
    let (fixture, _state, app) = test_app().await;
    fixture.insert_raw(7, 3, 1000, 500_000).await;

    let (status, value) = post_json(
        &app,
        "/latency/get",
        serde_json::json!({ "monitor_id": 7 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["status"], "OK");

    let recent = value["recent"].as_array().unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0]["monitor_id"], 7);
    assert_eq!(recent[0]["server_id"], 3);
    assert_eq!(recent[0]["region_id"], 1);
    assert_eq!(recent[0]["customer_id"], 20);
    assert_eq!(recent[0]["latency"], 0.5);
    assert_eq!(recent[0]["timestamp"], E + 1000);
    assert!(value["aggregated"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn statistics_answer_in_seconds() {
    let (fixture, _state, app) = test_app().await;
    for (ts, latency) in [(100, 100_000), (200, 300_000)] {
        fixture.insert_raw(7, 3, ts, latency).await;
    }

    let (status, value) = post_json(
        &app,
        "/latency/statistics",
        serde_json::json!({ "monitor_id": 7 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["status"], "OK");

    let stats = &value["statistics"];
    assert!((stats["mean"].as_f64().unwrap() - 0.2).abs() < 1e-9);
    assert!((stats["minimum"].as_f64().unwrap() - 0.1).abs() < 1e-9);
    assert!((stats["maximum"].as_f64().unwrap() - 0.3).abs() < 1e-9);
    assert_eq!(stats["number_samples"], 2);
}

#[tokio::test]
async fn statistics_with_no_data_fail_in_band() {
    let (_fixture, _state, app) = test_app().await;

    let (status, value) = post_json(
        &app,
        "/latency/statistics",
        serde_json::json!({ "monitor_id": 7 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["status"], "failed");
}

#[tokio::test]
async fn purge_removes_a_customers_rows() {
    let (fixture, _state, app) = test_app().await;
    fixture.insert_raw(7, 3, 1000, 500_000).await;

    let (status, value) = post_json(&app, "/latency/purge", serde_json::json!([20])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["status"], "OK");
    assert!(fixture.raw_rows().await.is_empty());
}

#[tokio::test]
async fn purge_rejects_duplicates_and_bad_ids() {
    let (_fixture, _state, app) = test_app().await;

    let (_, value) = post_json(&app, "/latency/purge", serde_json::json!([20, 20])).await;
    assert_eq!(value["status"], "failed, duplicate customer ID");

    let (_, value) = post_json(&app, "/latency/purge", serde_json::json!([0])).await;
    assert_eq!(value["status"], "failed, invalid customer ID");

    let (status, _) = post_json(&app, "/latency/purge", serde_json::json!({"ids": [1]})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn customer_list_requires_latency_capability() {
    let (fixture, _state, app) = test_app().await;
    // Customer 21 exists but has no latency tracking.
    fixture.seed_customer(21, CustomerCapabilities::ACTIVE).await;

    let (_, value) = post_json(
        &app,
        "/v1/latency/list",
        serde_json::json!({ "customer_id": 21 }),
    )
    .await;
    assert_eq!(value["status"], "failed, latency tracking not available");

    let (_, value) = post_json(
        &app,
        "/v1/latency/list",
        serde_json::json!({ "customer_id": 404 }),
    )
    .await;
    assert_eq!(value["status"], "failed, unknown customer");

    let (_, value) = post_json(&app, "/v1/latency/list", serde_json::json!({})).await;
    assert_eq!(value["status"], "failed, customer ID is required");
}

#[tokio::test]
async fn customer_list_hides_the_server_fleet() {
    let (fixture, _state, app) = test_app().await;
    fixture.insert_raw(7, 3, 1000, 500_000).await;

    let (status, value) = post_json(
        &app,
        "/v1/latency/list",
        serde_json::json!({ "customer_id": 20 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["status"], "OK");

    let recent = value["recent"].as_array().unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0]["monitor_id"], 7);
    assert_eq!(recent[0]["region_id"], 1);
    assert!(recent[0].get("server_id").is_none());
    assert!(recent[0].get("customer_id").is_none());

    // A server_id key is not part of the customer API shape at all.
    let (status, _) = post_json(
        &app,
        "/v1/latency/list",
        serde_json::json!({ "customer_id": 20, "server_id": 3 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
