//! Bounded queue of requests waiting for connectivity.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sparkle_domain::{ApiError, ApiResponse, QueuedRequest};
use tokio::sync::oneshot;

pub(crate) type Responder = oneshot::Sender<Result<ApiResponse, ApiError>>;

/// A queued request and the caller waiting on it.
pub(crate) struct PendingRequest {
    pub(crate) entry: QueuedRequest,
    pub(crate) last_error: Option<ApiError>,
    responder: Responder,
}

impl PendingRequest {
    pub(crate) const fn new(entry: QueuedRequest, responder: Responder) -> Self {
        Self {
            entry,
            last_error: None,
            responder,
        }
    }

    /// True once the caller stopped waiting.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.responder.is_closed()
    }

    pub(crate) fn settle(self, result: Result<ApiResponse, ApiError>) {
        let _ = self.responder.send(result);
    }

    /// Rejects with the last observed error, or `fallback` if none.
    pub(crate) fn reject(mut self, fallback: ApiError) {
        let error = self.last_error.take().unwrap_or(fallback);
        self.settle(Err(error));
    }
}

/// FIFO of requests waiting to be replayed.
pub struct RetryQueue {
    entries: Mutex<VecDeque<PendingRequest>>,
    capacity: usize,
}

impl RetryQueue {
    /// Creates an empty queue holding at most `capacity` entries.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Number of waiting requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copies of the waiting requests, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueuedRequest> {
        self.lock().iter().map(|p| p.entry.clone()).collect()
    }

    /// Appends a request, handing it back if the queue is full.
    pub(crate) fn push(&self, pending: PendingRequest) -> Result<(), PendingRequest> {
        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            return Err(pending);
        }
        entries.push_back(pending);
        Ok(())
    }

    /// Removes and returns every entry.
    pub(crate) fn take_all(&self) -> Vec<PendingRequest> {
        self.lock().drain(..).collect()
    }

    /// Puts survivors of a drain back ahead of anything queued meanwhile.
    pub(crate) fn restore(&self, survivors: Vec<PendingRequest>) {
        let mut entries = self.lock();
        for pending in survivors.into_iter().rev() {
            entries.push_front(pending);
        }
    }

    /// Removes entries older than `max_age` or whose caller went away.
    pub(crate) fn take_stale(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<PendingRequest> {
        let mut entries = self.lock();
        let (stale, fresh): (Vec<_>, Vec<_>) = entries
            .drain(..)
            .partition(|p| p.is_abandoned() || p.entry.is_expired(now, max_age));
        entries.extend(fresh);
        stale
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<PendingRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RetryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
