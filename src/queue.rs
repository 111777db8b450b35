//! Bounded double-ended request queue.
//!
//! On-demand requests jump the line (head), periodic ones wait their turn
//! (tail); each group keeps its arrival order. A request replayed after an
//! outage goes before both. A full queue sheds the new request instead of
//! blocking the producer. Exactly one consumer waits on [`RequestQueue::pop`].

use log::warn;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{Notify, oneshot};

use crate::error::{QueueFull, RequestError};
use crate::request::Request;

pub const DEFAULT_CAPACITY: usize = 30;
/// Remaining free slots at which the queue is reported as nearly full.
pub const DEFAULT_WARN_MARGIN: usize = 5;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Position {
    Head,
    Tail,
}

pub(crate) type Reply = oneshot::Sender<Result<String, RequestError>>;

/// A queued request, plus the waiting caller for synchronous round trips.
pub(crate) struct QueuedRequest {
    pub request: Request,
    pub reply: Option<Reply>,
    /// Inserted at the head; stays ahead of every tail entry.
    urgent: bool,
}

impl QueuedRequest {
    pub fn new(request: Request, reply: Option<Reply>) -> Self {
        QueuedRequest {
            request,
            reply,
            urgent: false,
        }
    }
}

impl From<Request> for QueuedRequest {
    fn from(request: Request) -> Self {
        QueuedRequest::new(request, None)
    }
}

struct Entries {
    items: VecDeque<QueuedRequest>,
    nearly_full_reported: bool,
}

pub struct RequestQueue {
    entries: Mutex<Entries>,
    capacity: usize,
    warn_margin: usize,
    notify: Notify,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_WARN_MARGIN)
    }
}

impl RequestQueue {
    pub fn new(capacity: usize, warn_margin: usize) -> Self {
        RequestQueue {
            entries: Mutex::new(Entries {
                items: VecDeque::with_capacity(capacity),
                nearly_full_reported: false,
            }),
            capacity,
            warn_margin,
            notify: Notify::new(),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Try to insert; never blocks.
    pub fn push(&self, request: Request, position: Position) -> Result<(), QueueFull> {
        self.push_entry(request.into(), position).map_err(|_| QueueFull {
            capacity: self.capacity,
        })
    }

    /// Like [`RequestQueue::push`], but hands the rejected entry back so a
    /// waiting caller can be answered.
    pub(crate) fn push_entry(&self, mut entry: QueuedRequest, position: Position) -> Result<(), QueuedRequest> {
        entry.urgent = position == Position::Head;
        self.insert(entry, |items| match position {
            Position::Head => items.iter().take_while(|e| e.urgent).count(),
            Position::Tail => items.len(),
        })
    }

    /// Put a request that failed during an outage in front of everything,
    /// including on-demand requests queued while the service was down.
    pub fn push_replay(&self, request: Request) -> Result<(), QueueFull> {
        let mut entry = QueuedRequest::from(request);
        entry.urgent = true;
        self.insert(entry, |_| 0).map_err(|_| QueueFull {
            capacity: self.capacity,
        })
    }

    fn insert(
        &self,
        entry: QueuedRequest,
        index: impl FnOnce(&VecDeque<QueuedRequest>) -> usize,
    ) -> Result<(), QueuedRequest> {
        {
            let mut entries = self.entries();
            if entries.items.len() >= self.capacity {
                warn!(
                    "Request queue full ({} entries); dropping {} for system {}",
                    self.capacity,
                    entry.request.kind().name(),
                    describe_target(&entry.request)
                );
                return Err(entry);
            }
            let at = index(&entries.items);
            entries.items.insert(at, entry);
            let remaining = self.capacity - entries.items.len();
            if remaining <= self.warn_margin && !entries.nearly_full_reported {
                entries.nearly_full_reported = true;
                warn!(
                    "Request queue nearly full: {} of {} slots used",
                    entries.items.len(),
                    self.capacity
                );
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    fn after_removal(&self, entries: &mut Entries) {
        if self.capacity - entries.items.len() > self.warn_margin {
            entries.nearly_full_reported = false;
        }
    }

    pub(crate) fn try_pop(&self) -> Option<QueuedRequest> {
        let mut entries = self.entries();
        let entry = entries.items.pop_front();
        self.after_removal(&mut entries);
        entry
    }

    /// Wait for the next entry. Cancel-safe: dropping the future never loses
    /// an entry.
    pub(crate) async fn pop(&self) -> QueuedRequest {
        loop {
            if let Some(entry) = self.try_pop() {
                return entry;
            }
            self.notify.notified().await;
        }
    }

    /// Remove the entries of callers waiting on a synchronous round trip.
    pub(crate) fn take_waiting(&self) -> Vec<QueuedRequest> {
        let mut entries = self.entries();
        let (waiting, rest): (Vec<_>, Vec<_>) = entries.items.drain(..).partition(|e| e.reply.is_some());
        entries.items = rest.into();
        self.after_removal(&mut entries);
        waiting
    }

    /// Drop everything; waiting synchronous callers see their reply channel close.
    pub fn clear(&self) {
        let mut entries = self.entries();
        entries.items.clear();
        self.after_removal(&mut entries);
    }

    /// Queued requests, head first.
    pub fn snapshot(&self) -> Vec<Request> {
        self.entries().items.iter().map(|e| e.request.clone()).collect()
    }
}

fn describe_target(request: &Request) -> String {
    request
        .system_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string())
}
