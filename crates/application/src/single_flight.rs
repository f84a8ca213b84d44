//! Collapses concurrent executions of the same operation into one.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

/// Runs at most one operation at a time and shares its result with every
/// caller that arrived while it was running.
///
/// If the running caller is cancelled, one of the waiters takes over and runs
/// its own operation.
#[derive(Debug)]
pub struct SingleFlight<T> {
    waiters: Mutex<Option<Vec<oneshot::Sender<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    /// Creates an idle flight.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(None),
        }
    }

    /// Returns true while an operation is running.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Runs `operation`, or waits for the one already running.
    pub async fn run<F, Fut>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            let Some(receiver) = self.register() else {
                break;
            };
            if let Ok(value) = receiver.await {
                return value;
            }
        }

        let mut guard = LeaderGuard {
            flight: self,
            finished: false,
        };
        let value = operation().await;
        guard.finish(&value);
        value
    }

    /// Waits for the running operation, if any, and returns its result.
    pub async fn join(&self) -> Option<T> {
        loop {
            let receiver = {
                let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
                let list = waiters.as_mut()?;
                let (sender, receiver) = oneshot::channel();
                list.push(sender);
                receiver
            };
            if let Ok(value) = receiver.await {
                return Some(value);
            }
        }
    }

    /// Joins the running operation, or claims leadership when idle.
    fn register(&self) -> Option<oneshot::Receiver<T>> {
        let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = waiters.as_mut() {
            let (sender, receiver) = oneshot::channel();
            list.push(sender);
            Some(receiver)
        } else {
            *waiters = Some(Vec::new());
            None
        }
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct LeaderGuard<'a, T> {
    flight: &'a SingleFlight<T>,
    finished: bool,
}

impl<T: Clone> LeaderGuard<'_, T> {
    fn finish(&mut self, value: &T) {
        self.finished = true;
        let waiters = self
            .flight
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(value.clone());
        }
    }
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            // Dropping the senders wakes the waiters, which then race to lead.
            self.flight
                .waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }
    }
}
