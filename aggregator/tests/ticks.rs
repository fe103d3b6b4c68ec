use std::collections::BTreeSet;
use std::sync::Arc;

use aggregator::{Aggregator, Parameters};
use data_types::{CustomerId, ZORAN_EPOCH_OFFSET};
use pulse_tests::TestDb;
use pulse_time::MockProvider;
use sqlx::Row;

const E: u64 = ZORAN_EPOCH_OFFSET;

#[derive(Debug, PartialEq)]
struct AggRow {
    monitor_id: u32,
    server_id: u16,
    timestamp: u32,
    latency: u32,
    start: u32,
    end: u32,
    mean: f64,
    variance: f64,
    minimum: u32,
    maximum: u32,
    n: u32,
}

async fn aggregated_rows(fixture: &TestDb) -> Vec<AggRow> {
    sqlx::query(
        "SELECT * FROM latency_aggregated \
         ORDER BY monitor_id, server_id, start_timestamp",
    )
    .fetch_all(fixture.db.pool())
    .await
    .unwrap()
    .iter()
    .map(|r| AggRow {
        monitor_id: r.get::<i64, _>("monitor_id") as u32,
        server_id: r.get::<i64, _>("server_id") as u16,
        timestamp: r.get::<i64, _>("timestamp") as u32,
        latency: r.get::<i64, _>("latency") as u32,
        start: r.get::<i64, _>("start_timestamp") as u32,
        end: r.get::<i64, _>("end_timestamp") as u32,
        mean: r.get("mean_latency"),
        variance: r.get("variance_latency"),
        minimum: r.get::<i64, _>("minimum_latency") as u32,
        maximum: r.get::<i64, _>("maximum_latency") as u32,
        n: r.get::<i64, _>("number_samples") as u32,
    })
    .collect()
}

async fn seeded_fixture() -> TestDb {
    let fixture = TestDb::new().await;
    fixture.seed_region(1, "us-west").await;
    fixture.seed_server(3, 1, "198.51.100.7").await;
    fixture.seed_monitor(7, 20, 30).await;
    fixture
}

#[tokio::test]
async fn one_window_is_summarised_exactly() {
    let fixture = seeded_fixture().await;
    for (ts, latency) in [(100, 100), (200, 200), (300, 300), (400, 400)] {
        fixture.insert_raw(7, 3, ts, latency).await;
    }

    let clock = MockProvider::new(E + 10_000);
    let aggregator = Aggregator::new(
        fixture.db.clone(),
        clock,
        Parameters::raw_tier(0, 3600, 1_000_000),
    );
    aggregator.tick().await.unwrap();

    let rows = aggregated_rows(&fixture).await;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.monitor_id, 7);
    assert_eq!(row.server_id, 3);
    assert_eq!(row.start, 0);
    assert_eq!(row.end, 3600);
    assert_eq!(row.mean, 250.0);
    assert_eq!(row.variance, 12_500.0);
    assert_eq!(row.minimum, 100);
    assert_eq!(row.maximum, 400);
    assert_eq!(row.n, 4);

    // The representative is one of the four observations, and sits inside
    // the window.
    assert!(row.timestamp >= 100 && row.timestamp <= 400);
    assert_eq!(row.latency, row.timestamp);

    // Consumed raw rows are gone.
    assert!(fixture.raw_rows().await.is_empty());
}

#[tokio::test]
async fn windows_are_aligned_and_period_wide() {
    let fixture = seeded_fixture().await;
    for i in 0..40u32 {
        fixture.insert_raw(7, 3, 50 + i * 700, 1_000 + i).await;
    }

    let clock = MockProvider::new(E + 400_000);
    let aggregator = Aggregator::new(
        fixture.db.clone(),
        clock,
        Parameters::raw_tier(0, 3600, 10_000_000),
    );
    aggregator.tick().await.unwrap();

    let rows = aggregated_rows(&fixture).await;
    assert!(rows.len() > 1);
    for row in &rows {
        assert_eq!(row.start % 3600, 0);
        assert_eq!(row.end - row.start, 3600);
        assert!(row.start <= row.timestamp && row.timestamp < row.end);
        assert!(f64::from(row.minimum) <= row.mean && row.mean <= f64::from(row.maximum));
        assert!(row.variance >= 0.0);
        assert!(row.n >= 1);
    }
}

#[tokio::test]
async fn reaggregation_reproduces_mean_and_variance() {
    let fixture = seeded_fixture().await;
    // Two first-tier windows: {100, 200} in [0, 3600) and {300, 400} in
    // [3600, 7200).
    for (ts, latency) in [(100, 100), (200, 200), (3700, 300), (3800, 400)] {
        fixture.insert_raw(7, 3, ts, latency).await;
    }

    let clock = MockProvider::new(E + 30_000);
    let first_tier = Aggregator::new(
        fixture.db.clone(),
        Arc::clone(&clock) as _,
        Parameters::raw_tier(0, 3600, 10_000_000),
    );
    first_tier.tick().await.unwrap();

    let tier_one = aggregated_rows(&fixture).await;
    assert_eq!(tier_one.len(), 2);
    assert_eq!(tier_one[0].mean, 150.0);
    assert_eq!(tier_one[0].variance, 2_500.0);
    assert_eq!(tier_one[1].mean, 350.0);
    assert_eq!(tier_one[1].variance, 2_500.0);

    // Second tier with a coarser window covering both summaries.
    let second_tier = Aggregator::new(
        fixture.db.clone(),
        clock,
        Parameters::reaggregation_tier(0, 10_800, 10_000_000),
    );
    second_tier.tick().await.unwrap();

    let rows = aggregated_rows(&fixture).await;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];

    // Population statistics of {100, 200, 300, 400}, reproduced through
    // two levels of aggregation.
    assert!((row.mean - 250.0).abs() < f64::EPSILON * 250.0);
    assert!((row.variance - 12_500.0).abs() < f64::EPSILON * 12_500.0);
    assert_eq!(row.minimum, 100);
    assert_eq!(row.maximum, 400);
    assert_eq!(row.n, 4);
    assert_eq!((row.start, row.end), (0, 10_800));
}

#[tokio::test]
async fn retention_sweep_removes_expired_rows_from_both_tables() {
    let fixture = seeded_fixture().await;

    let now = E + 1_000_000;
    let old = data_types::to_zoran(now - 200_000);
    let fresh = data_types::to_zoran(now - 1_000);

    fixture.insert_raw(7, 3, old, 500).await;
    fixture.insert_raw(7, 3, fresh, 600).await;
    sqlx::query(
        "INSERT INTO latency_aggregated (monitor_id, server_id, timestamp, latency, \
         start_timestamp, end_timestamp, mean_latency, variance_latency, \
         minimum_latency, maximum_latency, number_samples) \
         VALUES (7, 3, ?, 500, 0, 3600, 500.0, 0.0, 500, 500, 1)",
    )
    .bind(i64::from(old))
    .execute(fixture.db.pool())
    .await
    .unwrap();

    let clock = MockProvider::new(now);
    // Nothing is old enough to aggregate (max age beyond the data), but
    // the 86 400 s expunge horizon catches the old rows.
    let aggregator = Aggregator::new(
        fixture.db.clone(),
        clock,
        Parameters::raw_tier(500_000, 3600, 86_400),
    );
    aggregator.tick().await.unwrap();

    let raw = fixture.raw_rows().await;
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].2, fresh);

    assert_eq!(fixture.count_aggregated().await, 0);
}

#[tokio::test]
async fn purge_by_customer_spans_both_tables() {
    let fixture = seeded_fixture().await;
    // A second customer (21) with its own monitor.
    fixture.seed_monitor(8, 21, 31).await;

    fixture.insert_raw(7, 3, 100, 500).await;
    fixture.insert_raw(8, 3, 100, 600).await;
    for monitor_id in [7_i64, 8] {
        sqlx::query(
            "INSERT INTO latency_aggregated (monitor_id, server_id, timestamp, latency, \
             start_timestamp, end_timestamp, mean_latency, variance_latency, \
             minimum_latency, maximum_latency, number_samples) \
             VALUES (?, 3, 100, 500, 0, 3600, 500.0, 0.0, 500, 500, 1)",
        )
        .bind(monitor_id)
        .execute(fixture.db.pool())
        .await
        .unwrap();
    }

    let clock = MockProvider::new(E + 1_000);
    let aggregator = Aggregator::new(
        fixture.db.clone(),
        clock,
        Parameters::raw_tier(0, 3600, 1_000_000),
    );

    aggregator
        .delete_by_customer(&BTreeSet::from([CustomerId::new(20)]))
        .await
        .unwrap();

    // Customer 20 (monitor 7) is gone everywhere; customer 21 remains.
    assert_eq!(fixture.raw_rows().await, vec![(8, 3, 100, 600)]);
    let remaining = aggregated_rows(&fixture).await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].monitor_id, 8);
}

#[tokio::test]
async fn failed_tick_leaves_input_intact() {
    let fixture = seeded_fixture().await;
    fixture.insert_raw(7, 3, 100, 500).await;

    let clock = MockProvider::new(E + 10_000);
    let aggregator = Aggregator::new(
        fixture.db.clone(),
        clock,
        Parameters {
            // A missing output table fails the transaction mid-tick.
            output_table: "no_such_table".to_owned(),
            ..Parameters::raw_tier(0, 3600, 1_000_000)
        },
    );

    assert_matches::assert_matches!(aggregator.tick().await, Err(_));
    assert_eq!(fixture.raw_rows().await.len(), 1);
}
