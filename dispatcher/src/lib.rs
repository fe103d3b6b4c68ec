//! Outbound JSON posting with per-destination FIFO ordering.
//!
//! Each destination owns a [`Dispatcher`]: a queue drained by one worker
//! that keeps at most one request in flight, retries the head forever on
//! transport failure, and delivers an optional completion callback after a
//! short grace once the head succeeds. A dispatcher created with garbage
//! collection enabled asks its [`DispatcherFactory`] to collect it after an
//! hour of idleness.
//!
//! The FIFO + infinite-retry contract is what lets upstream flows (event
//! notifications, purge confirmations) treat delivery as fire-and-forget.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations,
    missing_docs
)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

mod transport;

pub use transport::{HttpTransport, Transport, TransportError};

/// Tuning for dispatchers. Defaults: 60 s retry, 10 ms callback grace,
/// 3600 s idle before garbage collection.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Pause before retrying the head request after a transport failure.
    pub retry_interval: Duration,
    /// Delay between a successful send and its completion callback, giving
    /// the response event time to propagate first.
    pub callback_grace: Duration,
    /// Idle time after which a GC-enabled dispatcher asks to be collected.
    pub max_idle: Duration,
    /// Whether idle dispatchers are collected at all.
    pub garbage_collect: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(60),
            callback_grace: Duration::from_millis(10),
            max_idle: Duration::from_secs(3600),
            garbage_collect: true,
        }
    }
}

/// One message to deliver.
#[derive(Debug)]
pub struct Request {
    /// Path appended to the destination authority.
    pub endpoint: String,
    /// JSON body.
    pub body: serde_json::Value,
    /// Short description for the success log line.
    pub log_text: String,
    /// Fired (after the grace period) once this request has been
    /// delivered.
    pub callback: Option<oneshot::Sender<()>>,
}

impl Request {
    /// A fire-and-forget request.
    pub fn new(endpoint: impl Into<String>, body: serde_json::Value, log_text: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            body,
            log_text: log_text.into(),
            callback: None,
        }
    }

    /// Attach a completion callback.
    pub fn with_callback(mut self, callback: oneshot::Sender<()>) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// Handle to one destination's posting worker.
#[derive(Debug)]
pub struct Dispatcher {
    destination: String,
    tx: mpsc::UnboundedSender<Request>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create a dispatcher and spawn its worker. `collect_tx`, when given,
    /// receives this destination once the worker goes idle long enough to
    /// be collected.
    pub fn new(
        destination: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: DispatcherConfig,
        collect_tx: Option<mpsc::UnboundedSender<String>>,
    ) -> Self {
        let destination = destination.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            destination: destination.clone(),
            transport,
            config,
            collect_tx,
        };
        let handle = tokio::spawn(worker.run(rx));

        Self {
            destination,
            tx,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// The authority this dispatcher posts to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Queue a request. Returns the request back if the worker has already
    /// been collected, so the caller can re-create the dispatcher.
    pub fn post(&self, request: Request) -> Result<(), Request> {
        self.tx.send(request).map_err(|e| e.0)
    }

    /// Stop accepting work and wait for the worker to drain out.
    pub async fn shutdown(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            // Cancels any pending retry timer and drops the queue; the
            // receiver going away makes later posts fail fast.
            handle.abort();
            let _ = handle.await;
        }
    }
}

struct Worker {
    destination: String,
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    collect_tx: Option<mpsc::UnboundedSender<String>>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Request>) {
        let mut queue: VecDeque<Request> = VecDeque::new();

        loop {
            if queue.is_empty() {
                let next = if self.config.garbage_collect {
                    match tokio::time::timeout(self.config.max_idle, rx.recv()).await {
                        Ok(next) => next,
                        Err(_) => {
                            // Idle long enough; close the intake first so a
                            // racing post fails over to a fresh dispatcher.
                            rx.close();
                            match rx.recv().await {
                                Some(request) => Some(request),
                                None => {
                                    if let Some(collect) = &self.collect_tx {
                                        let _ = collect.send(self.destination.clone());
                                    }
                                    return;
                                }
                            }
                        }
                    }
                } else {
                    rx.recv().await
                };

                match next {
                    Some(request) => queue.push_back(request),
                    None => return,
                }
            }

            // Pull in anything else already queued on the channel.
            while let Ok(request) = rx.try_recv() {
                queue.push_back(request);
            }

            let head = queue.front().expect("queue refilled above");
            match self
                .transport
                .post(&self.destination, &head.endpoint, &head.body)
                .await
            {
                Ok(response) => {
                    let status_ok = response.get("status").and_then(|s| s.as_str()) == Some("OK");
                    if status_ok {
                        info!(
                            destination = %self.destination,
                            endpoint = %head.endpoint,
                            detail = %head.log_text,
                            "posted outbound message"
                        );
                    }

                    let delivered = queue.pop_front().expect("head still present");
                    if let Some(callback) = delivered.callback {
                        tokio::time::sleep(self.config.callback_grace).await;
                        let _ = callback.send(());
                    }
                }
                Err(e) => {
                    warn!(
                        destination = %self.destination,
                        endpoint = %head.endpoint,
                        error = %e,
                        retry_in = ?self.config.retry_interval,
                        "outbound post failed, will retry"
                    );
                    tokio::time::sleep(self.config.retry_interval).await;
                }
            }
        }
    }
}

/// Creates dispatchers on demand, one per destination, and forgets them
/// again once they report themselves idle.
#[derive(Debug)]
pub struct DispatcherFactory {
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    dispatchers: Arc<Mutex<HashMap<String, Arc<Dispatcher>>>>,
    collect_tx: mpsc::UnboundedSender<String>,
}

impl DispatcherFactory {
    /// Create a factory posting through `transport`.
    pub fn new(transport: Arc<dyn Transport>, config: DispatcherConfig) -> Self {
        let dispatchers: Arc<Mutex<HashMap<String, Arc<Dispatcher>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let (collect_tx, mut collect_rx) = mpsc::unbounded_channel::<String>();
        let collectable = Arc::clone(&dispatchers);
        tokio::spawn(async move {
            while let Some(destination) = collect_rx.recv().await {
                collectable.lock().remove(&destination);
            }
        });

        Self {
            transport,
            config,
            dispatchers,
            collect_tx,
        }
    }

    /// Queue `request` for `destination`, creating its dispatcher if
    /// needed (or re-creating it when a collected one is caught mid-race).
    pub fn post(&self, destination: &str, request: Request) {
        let mut request = request;
        loop {
            let dispatcher = self.dispatcher(destination);
            match dispatcher.post(request) {
                Ok(()) => return,
                Err(returned) => {
                    // The worker was collected between lookup and send;
                    // drop the stale entry and try again.
                    self.dispatchers.lock().remove(destination);
                    request = returned;
                }
            }
        }
    }

    /// Number of live dispatchers (for introspection and tests).
    pub fn len(&self) -> usize {
        self.dispatchers.lock().len()
    }

    /// Whether no dispatcher is currently live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dispatcher(&self, destination: &str) -> Arc<Dispatcher> {
        let mut dispatchers = self.dispatchers.lock();
        let dispatcher = dispatchers
            .entry(destination.to_owned())
            .or_insert_with(|| {
                Arc::new(Dispatcher::new(
                    destination,
                    Arc::clone(&self.transport),
                    self.config.clone(),
                    Some(self.collect_tx.clone()),
                ))
            });

        Arc::clone(dispatcher)
    }
}
