use std::time::Duration;

use data_types::{MonitorId, RegionId, Sample, ServerId};
use ingester::{IngestConfig, IngestRouter};
use pulse_tests::TestDb;

/// A configuration that flushes promptly so tests finish in milliseconds
/// rather than minutes.
fn fast_config() -> IngestConfig {
    IngestConfig {
        queue_check_interval: Duration::from_millis(20),
        cycles_before_forced_commit: 2,
        max_cached_entries: 1_000_000,
        max_rows_per_transaction: 100,
        retry_interval: Duration::from_millis(50),
    }
}

fn sample(monitor_id: u32, server_id: u16, timestamp: u32, latency: u32) -> Sample {
    Sample {
        monitor_id: MonitorId::new(monitor_id),
        server_id: ServerId::new(server_id),
        zoran_timestamp: timestamp,
        latency_micros: latency,
    }
}

/// Poll the raw table until it holds `n` rows or the deadline passes.
async fn wait_for_rows(fixture: &TestDb, n: usize) -> Vec<(u32, u16, u32, u32)> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let rows = fixture.raw_rows().await;
        if rows.len() >= n {
            return rows;
        }

        assert!(
            tokio::time::Instant::now() < deadline,
            "table never reached {n} rows (has {})",
            rows.len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn sample_reaches_the_raw_table() {
    let fixture = TestDb::new().await;
    fixture.seed_region(1, "us-west").await;
    fixture.seed_server(3, 1, "198.51.100.7").await;
    fixture.seed_monitor(7, 20, 30).await;

    let router = IngestRouter::new(fixture.db.clone(), fast_config());
    router.add_entry(RegionId::new(1), sample(7, 3, 1000, 500_000));

    let rows = wait_for_rows(&fixture, 1).await;
    assert_eq!(rows, vec![(7, 3, 1000, 500_000)]);

    router.shutdown().await;
}

#[tokio::test]
async fn duplicate_samples_collapse_to_one_row() {
    let fixture = TestDb::new().await;
    fixture.seed_region(1, "us-west").await;
    fixture.seed_server(3, 1, "198.51.100.7").await;
    fixture.seed_monitor(7, 20, 30).await;

    let router = IngestRouter::new(fixture.db.clone(), fast_config());
    for _ in 0..5 {
        router.add_entry(RegionId::new(1), sample(7, 3, 1000, 500_000));
    }
    // A second wave after the first may already have committed; the
    // conflict rule must still collapse everything to one row.
    tokio::time::sleep(Duration::from_millis(100)).await;
    router.add_entry(RegionId::new(1), sample(7, 3, 1000, 500_000));

    router.shutdown().await;

    let rows = fixture.raw_rows().await;
    assert_eq!(rows, vec![(7, 3, 1000, 500_000)]);
}

#[tokio::test]
async fn invalid_samples_are_dropped_silently() {
    let fixture = TestDb::new().await;
    fixture.seed_region(1, "us-west").await;
    fixture.seed_server(3, 1, "198.51.100.7").await;
    fixture.seed_monitor(7, 20, 30).await;

    let router = IngestRouter::new(fixture.db.clone(), fast_config());
    let region = RegionId::new(1);

    // Over the 60 s latency ceiling.
    router.add_entry(region, sample(7, 3, 100, 60_000_001));
    // Unknown monitor.
    router.add_entry(region, sample(999, 3, 101, 500));
    // Unknown server.
    router.add_entry(region, sample(7, 99, 102, 500));
    // The one valid sample; exactly at the ceiling is accepted.
    router.add_entry(region, sample(7, 3, 103, 60_000_000));

    router.shutdown().await;

    let rows = fixture.raw_rows().await;
    assert_eq!(rows, vec![(7, 3, 103, 60_000_000)]);
}

#[tokio::test]
async fn shutdown_drains_the_queue_without_waiting_for_a_cycle() {
    let fixture = TestDb::new().await;
    fixture.seed_region(1, "us-west").await;
    fixture.seed_server(3, 1, "198.51.100.7").await;
    fixture.seed_monitor(7, 20, 30).await;

    // Long check interval: only the shutdown drain can persist the rows.
    let config = IngestConfig {
        queue_check_interval: Duration::from_secs(600),
        ..fast_config()
    };

    let router = IngestRouter::new(fixture.db.clone(), config);
    router.add_entries(
        RegionId::new(1),
        (0..250).map(|i| sample(7, 3, 1000 + i, 1_000 + i)),
    );

    router.shutdown().await;

    // 250 rows span multiple 100-row transactions.
    assert_eq!(fixture.raw_rows().await.len(), 250);
}

#[tokio::test]
async fn queue_length_triggers_an_early_flush() {
    let fixture = TestDb::new().await;
    fixture.seed_region(1, "us-west").await;
    fixture.seed_server(3, 1, "198.51.100.7").await;
    fixture.seed_monitor(7, 20, 30).await;

    // Forced-commit horizon far away; only the length trigger can fire.
    let config = IngestConfig {
        queue_check_interval: Duration::from_millis(20),
        cycles_before_forced_commit: 1_000_000,
        max_cached_entries: 10,
        ..fast_config()
    };

    let router = IngestRouter::new(fixture.db.clone(), config);
    router.add_entries(
        RegionId::new(1),
        (0..10).map(|i| sample(7, 3, 2000 + i, 500)),
    );

    let rows = wait_for_rows(&fixture, 10).await;
    assert_eq!(rows.len(), 10);

    router.shutdown().await;
}

#[tokio::test]
async fn regions_get_distinct_ingestors() {
    let fixture = TestDb::new().await;
    fixture.seed_region(1, "us-west").await;
    fixture.seed_region(2, "eu-central").await;
    fixture.seed_server(3, 1, "198.51.100.7").await;
    fixture.seed_server(4, 2, "203.0.113.9").await;
    fixture.seed_monitor(7, 20, 30).await;

    let router = IngestRouter::new(fixture.db.clone(), fast_config());
    router.add_entry(RegionId::new(1), sample(7, 3, 1000, 100));
    router.add_entry(RegionId::new(2), sample(7, 4, 1000, 200));

    router.shutdown().await;

    let rows = fixture.raw_rows().await;
    assert_eq!(rows, vec![(7, 3, 1000, 100), (7, 4, 1000, 200)]);
}
