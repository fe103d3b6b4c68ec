//! The pulse daemon entry point.

use std::sync::Arc;

use clap::Parser;
use clap_blocks::aggregation::AggregationConfig;
use clap_blocks::database::DatabaseConfig;
use clap_blocks::http::HttpConfig;
use clap_blocks::ingest::IngestTuningConfig;
use clap_blocks::outbound::OutboundConfig;
use pulsed::http;
use pulsed::state::AppState;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(
    name = "pulsed",
    about = "Data-plane controller for distributed latency polling workers"
)]
struct Config {
    #[clap(flatten)]
    database: DatabaseConfig,

    #[clap(flatten)]
    http: HttpConfig,

    #[clap(flatten)]
    ingest: IngestTuningConfig,

    #[clap(flatten)]
    aggregation: AggregationConfig,

    #[clap(flatten)]
    outbound: OutboundConfig,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::parse();
    if let Err(e) = run(config).await {
        error!(error = %e, "pulsed failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let db = catalog::Db::connect(&config.database.database_path, config.database.max_connections)
        .await?;
    catalog::setup_schema(&db).await?;
    info!(path = %config.database.database_path.display(), "database ready");

    let time: Arc<dyn pulse_time::TimeProvider> = Arc::new(pulse_time::SystemProvider::new());

    let state = Arc::new(AppState::new(
        db.clone(),
        (&config.ingest).into(),
        config.aggregation.first_tier(),
        (&config.outbound).into(),
        Arc::clone(&time),
        config.http.website_authority.clone(),
    ));

    // Background aggregation: the always-on first tier, plus the optional
    // re-aggregation tier.
    let aggregation_shutdown = CancellationToken::new();
    let mut aggregation_tasks = vec![Arc::clone(&state.aggregator).spawn(aggregation_shutdown.child_token())];
    if let Some(parameters) = config.aggregation.second_tier() {
        let second_tier = Arc::new(aggregator::Aggregator::new(db, Arc::clone(&time), parameters));
        aggregation_tasks.push(second_tier.spawn(aggregation_shutdown.child_token()));
    }

    let app = http::router(Arc::clone(&state));
    info!(address = %config.http.bind_address, "API listening");

    axum::Server::bind(&config.http.bind_address)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    // Stop the workers, draining queued samples first.
    state.shutdown(aggregation_shutdown).await;
    for task in aggregation_tasks {
        let _ = task.await;
    }
    info!("shutdown complete");

    Ok(())
}
