//! Fan-out of incoming samples to per-region ingestors.

use std::collections::HashMap;
use std::sync::Arc;

use catalog::Db;
use data_types::{RegionId, Sample};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{IngestConfig, RegionIngestor};

/// Hands incoming samples to the [`RegionIngestor`] owning their region,
/// creating ingestors lazily on first use.
///
/// This is the sole entry point the upload endpoint uses; everything behind
/// it is asynchronous and non-blocking.
#[derive(Debug)]
pub struct IngestRouter {
    db: Db,
    config: IngestConfig,
    shutdown: CancellationToken,
    ingestors: Mutex<HashMap<RegionId, Arc<RegionIngestor>>>,
}

impl IngestRouter {
    /// Create a router; per-region workers are spawned on demand.
    pub fn new(db: Db, config: IngestConfig) -> Self {
        Self {
            db,
            config,
            shutdown: CancellationToken::new(),
            ingestors: Mutex::new(HashMap::new()),
        }
    }

    /// Queue one sample for `region_id` and wake the region's worker.
    pub fn add_entry(&self, region_id: RegionId, sample: Sample) {
        let ingestor = self.ingestor(region_id);
        ingestor.enqueue(sample);
        ingestor.kick();
    }

    /// Queue a batch of samples for `region_id` and wake the region's
    /// worker once.
    pub fn add_entries(&self, region_id: RegionId, samples: impl IntoIterator<Item = Sample>) {
        let ingestor = self.ingestor(region_id);
        ingestor.enqueue_many(samples);
        ingestor.kick();
    }

    /// Stop every region worker, draining queued samples first.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let ingestors: Vec<_> = self.ingestors.lock().values().map(Arc::clone).collect();
        for ingestor in ingestors {
            ingestor.join().await;
        }
    }

    fn ingestor(&self, region_id: RegionId) -> Arc<RegionIngestor> {
        let mut ingestors = self.ingestors.lock();
        let ingestor = ingestors.entry(region_id).or_insert_with(|| {
            Arc::new(RegionIngestor::new(
                self.db.clone(),
                region_id,
                self.config.clone(),
                self.shutdown.child_token(),
            ))
        });

        Arc::clone(ingestor)
    }
}
