//! Single-slot rendezvous between the render worker and one waiting
//! request handler.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// What the slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxStatus {
    /// Nothing delivered yet.
    Empty,
    /// An encoded image is waiting to be taken.
    Ready,
    /// The render failed; no image will arrive for this request.
    Failed,
}

/// A single-slot mailbox: the worker places one encoded image (or a
/// failure), exactly one waiter takes it, and the slot reverts to empty.
///
/// A second waiter on an already-drained mailbox simply blocks until the
/// next delivery.
#[derive(Debug)]
pub struct PlotMailbox {
    state: Mutex<(MailboxStatus, Option<Vec<u8>>)>,
    signal: Semaphore,
}

impl Default for PlotMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl PlotMailbox {
    /// An empty mailbox.
    pub fn new() -> Self {
        Self {
            state: Mutex::new((MailboxStatus::Empty, None)),
            signal: Semaphore::new(0),
        }
    }

    /// Current slot status.
    pub fn status(&self) -> MailboxStatus {
        self.state.lock().0
    }

    /// Discard a stale delivery so the slot is guaranteed empty before a
    /// new request is issued.
    pub fn force_empty(&self) {
        let mut state = self.state.lock();
        if state.0 != MailboxStatus::Empty {
            *state = (MailboxStatus::Empty, None);
            if let Ok(permit) = self.signal.try_acquire() {
                permit.forget();
            }
        }
    }

    /// Block until the worker delivers, then drain the slot. Returns the
    /// encoded image, or `None` when the worker reported a failure.
    pub async fn wait_for_image(&self) -> Option<Vec<u8>> {
        let permit = self
            .signal
            .acquire()
            .await
            .expect("plot mailbox semaphore never closes");
        permit.forget();

        let mut state = self.state.lock();
        let (status, bytes) = std::mem::replace(&mut *state, (MailboxStatus::Empty, None));

        match status {
            MailboxStatus::Ready => bytes,
            MailboxStatus::Failed | MailboxStatus::Empty => None,
        }
    }

    /// Place an encoded image and wake the waiter.
    pub fn send_image(&self, bytes: Vec<u8>) {
        let mut state = self.state.lock();
        *state = (MailboxStatus::Ready, Some(bytes));

        // The worker is the only releaser, so the slot never accumulates
        // more than one permit.
        if self.signal.available_permits() == 0 {
            self.signal.add_permits(1);
        }
    }

    /// Report that no image will arrive, waking the waiter empty-handed.
    pub fn send_failed(&self) {
        let mut state = self.state.lock();
        *state = (MailboxStatus::Failed, None);

        if self.signal.available_permits() == 0 {
            self.signal.add_permits(1);
        }
    }
}

/// The mailbox vector, indexed by caller-supplied context id and grown on
/// demand.
#[derive(Debug, Default)]
pub(crate) struct Mailboxes {
    slots: Mutex<Vec<Arc<PlotMailbox>>>,
}

impl Mailboxes {
    /// The mailbox for `context_id`, creating intermediate slots as
    /// needed.
    pub(crate) fn get(&self, context_id: u32) -> Arc<PlotMailbox> {
        let mut slots = self.slots.lock();
        let needed = context_id as usize + 1;
        while slots.len() < needed {
            slots.push(Arc::new(PlotMailbox::new()));
        }

        Arc::clone(&slots[context_id as usize])
    }
}
