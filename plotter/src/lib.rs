//! The plot rendering worker and its mailboxes.
//!
//! Any number of request handlers may ask for charts concurrently; a
//! single render worker serves them one at a time. Each caller supplies a
//! small integer context id, receives the mailbox registered under that
//! id, and blocks on it until the worker delivers the encoded image.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations,
    missing_docs
)]

use std::sync::Arc;

use parking_lot::Mutex;
use querier::{LatencyFilter, Querier};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

mod history;
pub mod layout;
mod mailbox;
mod render;

pub use layout::{FontSpec, FontWeight, DEFAULT_HEIGHT, DEFAULT_WIDTH};
pub use mailbox::{MailboxStatus, PlotMailbox};
pub use render::RenderError;

use mailbox::Mailboxes;

/// Mailbox/database context id reserved for the render worker itself, so
/// no request handler can collide with it.
pub const RENDER_CONTEXT_ID: u32 = u32::MAX - 9;

/// Supported output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Lossless PNG.
    Png,
    /// JPEG at fixed quality.
    Jpeg,
}

impl ImageFormat {
    /// Parse a MIME subtype such as `png` or `jpeg` (case-insensitive).
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    /// The full MIME type of this encoding.
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }
}

/// Presentation options shared by both chart types.
#[derive(Debug, Clone)]
pub struct PlotStyle {
    /// Chart title.
    pub title: String,
    /// X-axis title.
    pub x_axis_label: String,
    /// Y-axis title.
    pub y_axis_label: String,
    /// Title font; `None` keeps the built-in default.
    pub title_font: Option<FontSpec>,
    /// Axis-title font; `None` keeps the built-in default.
    pub axis_title_font: Option<FontSpec>,
    /// Tick-label font; `None` keeps the built-in default.
    pub axis_label_font: Option<FontSpec>,
    /// Canvas width, pixels (already clamped by the caller).
    pub width: u32,
    /// Canvas height, pixels (already clamped by the caller).
    pub height: u32,
    /// Output encoding.
    pub format: ImageFormat,
}

/// A request for a latency-over-time chart.
#[derive(Debug, Clone)]
pub struct HistoryPlotRequest {
    /// Which samples to plot.
    pub filter: LatencyFilter,
    /// Presentation options.
    pub style: PlotStyle,
    /// X-axis date format: a strftime string, or `"dow"` for the
    /// day-of-week axis clipped to the first sample's Monday-aligned week.
    pub date_format: String,
    /// Fixed lower y bound in seconds; negative means derive from data.
    pub minimum_latency: f64,
    /// Fixed upper y bound in seconds; negative means derive from data.
    pub maximum_latency: f64,
    /// Logarithmic y axis.
    pub log_scale: bool,
}

/// A request for a latency distribution chart.
#[derive(Debug, Clone)]
pub struct HistogramPlotRequest {
    /// Which samples to plot.
    pub filter: LatencyFilter,
    /// Presentation options.
    pub style: PlotStyle,
    /// Fixed lower x bound in seconds; negative means derive from data.
    pub minimum_latency: f64,
    /// Fixed upper x bound in seconds; negative means derive from data.
    pub maximum_latency: f64,
}

#[derive(Debug)]
enum RenderRequest {
    History {
        context_id: u32,
        request: Box<HistoryPlotRequest>,
    },
    Histogram {
        context_id: u32,
        request: Box<HistogramPlotRequest>,
    },
}

/// Handle to the single render worker.
#[derive(Debug)]
pub struct PlotWorker {
    tx: mpsc::UnboundedSender<RenderRequest>,
    mailboxes: Arc<Mailboxes>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlotWorker {
    /// Spawn the render worker reading samples through `querier`.
    pub fn new(querier: Querier) -> Self {
        let mailboxes = Arc::new(Mailboxes::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            querier,
            mailboxes: Arc::clone(&mailboxes),
        };
        let handle = tokio::spawn(worker.run(rx));

        Self {
            tx,
            mailboxes,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue a history plot and return the mailbox the image will arrive
    /// in. The caller's previous delivery under the same id, if never
    /// collected, is discarded first.
    pub fn request_history_plot(
        &self,
        context_id: u32,
        request: HistoryPlotRequest,
    ) -> Arc<PlotMailbox> {
        let mailbox = self.mailboxes.get(context_id);
        mailbox.force_empty();

        let queued = self.tx.send(RenderRequest::History {
            context_id,
            request: Box::new(request),
        });
        if queued.is_err() {
            mailbox.send_failed();
        }

        mailbox
    }

    /// Queue a histogram plot; otherwise as
    /// [`request_history_plot`](Self::request_history_plot).
    pub fn request_histogram_plot(
        &self,
        context_id: u32,
        request: HistogramPlotRequest,
    ) -> Arc<PlotMailbox> {
        let mailbox = self.mailboxes.get(context_id);
        mailbox.force_empty();

        let queued = self.tx.send(RenderRequest::Histogram {
            context_id,
            request: Box::new(request),
        });
        if queued.is_err() {
            mailbox.send_failed();
        }

        mailbox
    }

    /// Stop the worker. Requests already queued are abandoned; their
    /// waiters are woken empty-handed next time they are reused.
    pub async fn shutdown(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

struct Worker {
    querier: Querier,
    mailboxes: Arc<Mailboxes>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<RenderRequest>) {
        while let Some(request) = rx.recv().await {
            match request {
                RenderRequest::History {
                    context_id,
                    request,
                } => {
                    let result = self.render_history(&request).await;
                    self.deliver(context_id, result);
                }
                RenderRequest::Histogram {
                    context_id,
                    request,
                } => {
                    let result = self.render_histogram(&request).await;
                    self.deliver(context_id, result);
                }
            }
        }
    }

    fn deliver(&self, context_id: u32, result: Result<Vec<u8>, RenderError>) {
        let mailbox = self.mailboxes.get(context_id);
        match result {
            Ok(bytes) => mailbox.send_image(bytes),
            Err(e) => {
                warn!(context_id, error = %e, "plot render failed");
                mailbox.send_failed();
            }
        }
    }

    async fn render_history(
        &self,
        request: &HistoryPlotRequest,
    ) -> Result<Vec<u8>, RenderError> {
        let filter = fixed_filter(&request.filter);
        let (raw, aggregated) = self.querier.get_entries(&filter).await?;
        render::render_history(&raw, &aggregated, request)
    }

    async fn render_histogram(
        &self,
        request: &HistogramPlotRequest,
    ) -> Result<Vec<u8>, RenderError> {
        let filter = fixed_filter(&request.filter);
        let (raw, aggregated) = self.querier.get_entries(&filter).await?;
        render::render_histogram(&raw, &aggregated, request)
    }
}

/// Apply the time-range repair rules to a query filter.
fn fixed_filter(filter: &LatencyFilter) -> LatencyFilter {
    let mut start = filter.start_timestamp.unwrap_or(0);
    let mut end = filter.end_timestamp.unwrap_or(0);
    layout::fix_time_range(&mut start, &mut end);

    LatencyFilter {
        start_timestamp: (start > 0).then_some(start),
        end_timestamp: (end < u64::MAX).then_some(end),
        ..*filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_context_id_matches_the_reserved_sentinel() {
        // The reserved id is the two's-complement rendering of -10.
        assert_eq!(RENDER_CONTEXT_ID, (-10_i32) as u32);
    }

    #[test]
    fn image_format_parsing() {
        assert_eq!(ImageFormat::from_subtype("png"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_subtype("PNG"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_subtype("jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_subtype("jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_subtype("gif"), None);
        assert_eq!(ImageFormat::Png.mime(), "image/png");
    }

    #[test]
    fn filter_time_repair() {
        let open_ended = fixed_filter(&LatencyFilter::default());
        assert_eq!(open_ended.start_timestamp, None);
        assert_eq!(open_ended.end_timestamp, None);

        let collapsed = fixed_filter(&LatencyFilter {
            start_timestamp: Some(1000),
            end_timestamp: Some(1000),
            ..Default::default()
        });
        assert_eq!(collapsed.start_timestamp, Some(1000));
        assert_eq!(collapsed.end_timestamp, Some(1000 + 86_400));

        let reversed = fixed_filter(&LatencyFilter {
            start_timestamp: Some(500),
            end_timestamp: Some(200),
            ..Default::default()
        });
        assert_eq!(reversed.start_timestamp, Some(200));
        assert_eq!(reversed.end_timestamp, Some(500));
    }
}
