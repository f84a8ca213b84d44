//! HTTP client core.
//!
//! Wraps the request pipeline with the connection-aware policies: requests
//! that opted into queueing wait out offline periods, and a 401 from a
//! session-backed call triggers one shared token refresh followed by a single
//! replay.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sparkle_domain::{
    ApiError, ApiResponse, HttpMethod, QueuedRequest, RequestDescriptor, RequestOptions,
};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::pipeline::RequestPipeline;
use super::retry_queue::{PendingRequest, RetryQueue};
use super::session::SessionProvider;
use crate::connection::ConnectionMonitor;
use crate::ports::Clock;

const EXPIRED_MESSAGE: &str = "Request expired while waiting for connectivity";
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

enum Wake {
    Recovered,
    Sweep,
}

/// Outcome of one pass over the retry queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Requests sent.
    pub attempted: usize,
    /// Requests that succeeded and were handed to their caller.
    pub succeeded: usize,
    /// Requests that failed again and went back in the queue.
    pub requeued: usize,
    /// Requests rejected after a final failure.
    pub failed: usize,
    /// Requests dropped for exceeding the maximum age.
    pub expired: usize,
    /// Requests whose caller stopped waiting.
    pub abandoned: usize,
}

/// Connection-aware API client.
pub struct ApiClient {
    pipeline: RequestPipeline,
    session: Arc<dyn SessionProvider>,
    monitor: Arc<ConnectionMonitor>,
    clock: Arc<dyn Clock>,
    queue: RetryQueue,
    drain_lock: tokio::sync::Mutex<()>,
}

impl ApiClient {
    /// Creates a client.
    #[must_use]
    pub fn new(
        pipeline: RequestPipeline,
        session: Arc<dyn SessionProvider>,
        monitor: Arc<ConnectionMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue = RetryQueue::new(pipeline.config().queue.capacity);
        Self {
            pipeline,
            session,
            monitor,
            clock,
            queue,
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Executes a request.
    ///
    /// # Errors
    ///
    /// Returns the normalized error if the request failed and was not
    /// recovered by a refresh or a queued replay.
    pub async fn execute(&self, descriptor: RequestDescriptor) -> Result<ApiResponse, ApiError> {
        if !self.monitor.can_make_requests() {
            if descriptor.options.queue_if_offline {
                return self.enqueue(descriptor, None).await;
            }
            return Err(ApiError::network("No internet connection"));
        }

        match self.dispatch(&descriptor).await {
            Err(error)
                if error.is_retriable()
                    && descriptor.options.queue_if_offline
                    && !self.monitor.status().is_online =>
            {
                self.enqueue(descriptor, Some(error)).await
            }
            result => result,
        }
    }

    /// Sends a GET request.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<ApiResponse, ApiError> {
        self.execute(RequestDescriptor::new(HttpMethod::Get, url).with_options(options))
            .await
    }

    /// Sends a POST request.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn post(
        &self,
        url: &str,
        body: Value,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.execute(
            RequestDescriptor::new(HttpMethod::Post, url)
                .with_body(body)
                .with_options(options),
        )
        .await
    }

    /// Sends a PUT request.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn put(
        &self,
        url: &str,
        body: Value,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.execute(
            RequestDescriptor::new(HttpMethod::Put, url)
                .with_body(body)
                .with_options(options),
        )
        .await
    }

    /// Sends a PATCH request.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn patch(
        &self,
        url: &str,
        body: Value,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.execute(
            RequestDescriptor::new(HttpMethod::Patch, url)
                .with_body(body)
                .with_options(options),
        )
        .await
    }

    /// Sends a DELETE request.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn delete(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.execute(RequestDescriptor::new(HttpMethod::Delete, url).with_options(options))
            .await
    }

    /// Number of requests waiting in the retry queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Copies of the queued requests, oldest first.
    #[must_use]
    pub fn queued_requests(&self) -> Vec<QueuedRequest> {
        self.queue.snapshot()
    }

    /// Replays every queued request once.
    ///
    /// Entries past the maximum age are rejected without a replay. Entries
    /// that fail with a network or timeout error go back in the queue until
    /// their retry budget is spent; any other outcome settles the caller.
    pub async fn drain_queue(&self) -> DrainReport {
        let _serialized = self.drain_lock.lock().await;
        let mut report = DrainReport::default();
        let batch = self.queue.take_all();
        if batch.is_empty() {
            return report;
        }
        info!(count = batch.len(), "Replaying queued requests");

        let max_age = self.pipeline.config().queue.max_age();
        let mut survivors = Vec::new();
        for mut pending in batch {
            if pending.is_abandoned() {
                report.abandoned += 1;
                continue;
            }
            if pending.entry.is_expired(self.clock.now(), max_age) {
                report.expired += 1;
                debug!(id = %pending.entry.id, "Queued request expired");
                pending.reject(ApiError::network(EXPIRED_MESSAGE));
                continue;
            }

            report.attempted += 1;
            match self.dispatch(&pending.entry.descriptor).await {
                Err(error) if error.is_retriable() => {
                    pending.entry.retry_count += 1;
                    if pending.entry.retries_exhausted() {
                        report.failed += 1;
                        warn!(
                            id = %pending.entry.id,
                            retries = pending.entry.retry_count,
                            "Queued request exhausted its retries"
                        );
                        pending.settle(Err(error));
                    } else {
                        report.requeued += 1;
                        pending.last_error = Some(error);
                        survivors.push(pending);
                    }
                }
                Err(error) => {
                    report.failed += 1;
                    pending.settle(Err(error));
                }
                Ok(response) => {
                    report.succeeded += 1;
                    pending.settle(Ok(response));
                }
            }
        }
        self.queue.restore(survivors);

        info!(
            succeeded = report.succeeded,
            requeued = report.requeued,
            failed = report.failed,
            expired = report.expired,
            "Queue replay finished"
        );
        report
    }

    /// Rejects queued requests past the maximum age and forgets the ones
    /// whose caller stopped waiting. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let max_age = self.pipeline.config().queue.max_age();
        let stale = self.queue.take_stale(self.clock.now(), max_age);
        let count = stale.len();
        for pending in stale {
            pending.reject(ApiError::network(EXPIRED_MESSAGE));
        }
        if count > 0 {
            debug!(count, "Purged stale queued requests");
        }
        count
    }

    /// Spawns the task that replays the queue on reconnection.
    ///
    /// The task also sweeps expired entries and retries the queue
    /// periodically while requests can be made. It ends when the client is
    /// dropped or the monitor goes away.
    pub fn spawn_queue_drainer(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::downgrade(self);
        let mut events = self.monitor.subscribe();
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            sweep.tick().await;
            loop {
                let wake = tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) if event.is_recovery() => Wake::Recovered,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Queue drainer lagged behind connection events");
                            Wake::Sweep
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = sweep.tick() => Wake::Sweep,
                };
                let Some(client) = client.upgrade() else {
                    break;
                };
                match wake {
                    Wake::Recovered => {
                        client.drain_queue().await;
                    }
                    Wake::Sweep => {
                        client.purge_expired();
                        if !client.queue.is_empty() && client.monitor.can_make_requests() {
                            client.drain_queue().await;
                        }
                    }
                }
            }
        })
    }

    async fn enqueue(
        &self,
        descriptor: RequestDescriptor,
        error: Option<ApiError>,
    ) -> Result<ApiResponse, ApiError> {
        let queue_config = &self.pipeline.config().queue;
        let max_retries = descriptor
            .options
            .max_retries
            .unwrap_or(queue_config.max_retries);
        let entry = QueuedRequest::new(descriptor, max_retries, self.clock.now());
        let id = entry.id.clone();
        let (responder, receiver) = oneshot::channel();
        let mut pending = PendingRequest::new(entry, responder);
        pending.last_error.clone_from(&error);

        if self.queue.push(pending).is_err() {
            warn!(capacity = queue_config.capacity, "Retry queue is full");
            return Err(error.unwrap_or_else(|| {
                ApiError::network("No internet connection and the offline queue is full")
            }));
        }
        info!(id = %id, queued = self.queue.len(), "Request queued until connectivity returns");

        receiver
            .await
            .unwrap_or_else(|_| Err(ApiError::network("Queued request was dropped")))
    }

    /// One attempt, plus a single replay after a token refresh on 401.
    async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse, ApiError> {
        let token = if descriptor.options.skip_auth {
            None
        } else {
            self.session.access_token().await
        };

        match self.pipeline.send(descriptor, token.as_deref()).await {
            Err(error)
                if error.status_code == Some(401)
                    && self.may_refresh(descriptor, token.is_some()) =>
            {
                let fresh = match self.session.join_refresh().await {
                    Some(outcome) => outcome?,
                    // Someone else may have refreshed while this request was in flight.
                    None => match self.session.access_token().await {
                        Some(current) if Some(&current) != token.as_ref() => current,
                        _ => {
                            debug!(url = %descriptor.url, "Access token rejected; refreshing session");
                            self.session.refresh_access_token().await?
                        }
                    },
                };
                self.pipeline.send(descriptor, Some(&fresh)).await
            }
            result => result,
        }
    }

    fn may_refresh(&self, descriptor: &RequestDescriptor, had_token: bool) -> bool {
        had_token
            && !descriptor.options.skip_refresh
            && !self.pipeline.config().is_auth_endpoint(&descriptor.url)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("pipeline", &self.pipeline)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
