//! The daemon's composition root: every long-lived component, built once
//! and shared by the HTTP handlers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use aggregator::Aggregator;
use catalog::{Customers, Db, Monitors, Servers};
use dispatcher::{DispatcherConfig, DispatcherFactory, HttpTransport, Transport};
use ingester::{IngestConfig, IngestRouter};
use plotter::PlotWorker;
use querier::Querier;
use tokio_util::sync::CancellationToken;

/// Mailbox/context ids handed to plot requests cycle through this many
/// slots; concurrent plot requests beyond this bound would share a
/// mailbox.
const PLOT_CONTEXT_SLOTS: u32 = 1024;

/// Everything the HTTP surface needs, plus the background workers' guard
/// state.
#[derive(Debug)]
pub struct AppState {
    /// Database handle.
    pub db: Db,
    /// Servers catalog.
    pub servers: Servers,
    /// Monitors catalog.
    pub monitors: Monitors,
    /// Customer capability catalog.
    pub customers: Customers,
    /// Ingest fan-out.
    pub ingest: IngestRouter,
    /// Read-side queries.
    pub querier: Querier,
    /// First-tier aggregator; also serves purge requests.
    pub aggregator: Arc<Aggregator>,
    /// Chart rendering worker.
    pub plotter: PlotWorker,
    /// Outbound notification factory.
    pub dispatcher: DispatcherFactory,
    /// Website notification destination, when configured.
    pub website_authority: Option<String>,

    plot_contexts: AtomicU32,
}

impl AppState {
    /// Assemble the application over an opened database.
    pub fn new(
        db: Db,
        ingest_config: IngestConfig,
        aggregator_parameters: aggregator::Parameters,
        dispatcher_config: DispatcherConfig,
        time: Arc<dyn pulse_time::TimeProvider>,
        website_authority: Option<String>,
    ) -> Self {
        let querier = Querier::new(db.clone());
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new());

        Self {
            servers: Servers::new(db.clone()),
            monitors: Monitors::new(db.clone()),
            customers: Customers::new(db.clone()),
            ingest: IngestRouter::new(db.clone(), ingest_config),
            querier: querier.clone(),
            aggregator: Arc::new(Aggregator::new(db.clone(), time, aggregator_parameters)),
            plotter: PlotWorker::new(querier),
            dispatcher: DispatcherFactory::new(transport, dispatcher_config),
            website_authority,
            plot_contexts: AtomicU32::new(0),
            db,
        }
    }

    /// The mailbox/context id for the next plot request.
    pub fn next_plot_context(&self) -> u32 {
        self.plot_contexts.fetch_add(1, Ordering::Relaxed) % PLOT_CONTEXT_SLOTS
    }

    /// Stop the background workers, draining the ingest queues first.
    pub async fn shutdown(&self, aggregation: CancellationToken) {
        aggregation.cancel();
        self.ingest.shutdown().await;
        self.plotter.shutdown().await;
    }
}
