//! Network and backend health monitor.
//!
//! Combines the OS connectivity signal with an active health probe, keeps a
//! bounded history of transitions and persists the last known status.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sparkle_domain::{
    ConnectionEvent, ConnectionEventRecord, ConnectionQuality, ConnectionStatus, HealthConfig,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::observer::{Listeners, Subscription};
use crate::ports::{Clock, HealthProbe, KeyValueStorage, NetworkReachability, ProbeError};

/// Storage key for the last known status.
pub const STATUS_KEY: &str = "sparkle.connection.status";

/// Storage key for the event history.
pub const HISTORY_KEY: &str = "sparkle.connection.history";

const EVENT_CHANNEL_CAPACITY: usize = 32;
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// A transition together with the status that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionChange {
    /// What happened.
    pub event: ConnectionEvent,
    /// Status right after the transition.
    pub status: ConnectionStatus,
}

struct MonitorState {
    status: ConnectionStatus,
    history: VecDeque<ConnectionEventRecord>,
    /// Last observed values; `None` until the first observation.
    online: Option<bool>,
    reachable: Option<bool>,
}

/// Tracks connectivity and backend reachability.
pub struct ConnectionMonitor {
    reachability: Arc<dyn NetworkReachability>,
    probe: Arc<dyn HealthProbe>,
    storage: Arc<dyn KeyValueStorage>,
    clock: Arc<dyn Clock>,
    config: HealthConfig,
    state: Mutex<MonitorState>,
    last_known: Mutex<Option<ConnectionStatus>>,
    check_lock: tokio::sync::Mutex<()>,
    listeners: Listeners<ConnectionChange>,
    events: broadcast::Sender<ConnectionEvent>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    /// Creates a monitor. Until the first check it reports an optimistic
    /// online status so early requests are not held back.
    #[must_use]
    pub fn new(
        reachability: Arc<dyn NetworkReachability>,
        probe: Arc<dyn HealthProbe>,
        storage: Arc<dyn KeyValueStorage>,
        clock: Arc<dyn Clock>,
        config: HealthConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            reachability,
            probe,
            storage,
            clock,
            config,
            state: Mutex::new(MonitorState {
                status: ConnectionStatus::optimistic(),
                history: VecDeque::new(),
                online: None,
                reachable: None,
            }),
            last_known: Mutex::new(None),
            check_lock: tokio::sync::Mutex::new(()),
            listeners: Listeners::new(),
            events,
            timer: Mutex::new(None),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.lock_state().status.clone()
    }

    /// Whether requests should be attempted right now.
    #[must_use]
    pub fn can_make_requests(&self) -> bool {
        self.lock_state().status.can_make_requests()
    }

    /// Status persisted by a previous run, if [`Self::restore`] found one.
    #[must_use]
    pub fn last_known_status(&self) -> Option<ConnectionStatus> {
        self.last_known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Transition history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<ConnectionEventRecord> {
        self.lock_state().history.iter().cloned().collect()
    }

    /// Registers a callback invoked on every transition.
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectionChange) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    /// Returns a channel of transition events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Loads the status and history persisted by a previous run.
    ///
    /// Missing or unreadable data is ignored.
    pub async fn restore(&self) -> Option<ConnectionStatus> {
        let values = match self.storage.multi_get(&[STATUS_KEY, HISTORY_KEY]).await {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted connection state");
                return None;
            }
        };
        let mut values = values.into_iter();
        let status: Option<ConnectionStatus> = values.next().flatten().and_then(|raw| {
            serde_json::from_str(&raw)
                .inspect_err(|e| warn!(error = %e, "Discarding unreadable connection status"))
                .ok()
        });
        let history: Vec<ConnectionEventRecord> = values
            .next()
            .flatten()
            .and_then(|raw| {
                serde_json::from_str(&raw)
                    .inspect_err(|e| warn!(error = %e, "Discarding unreadable connection history"))
                    .ok()
            })
            .unwrap_or_default();

        {
            let mut state = self.lock_state();
            let live: Vec<_> = state.history.drain(..).collect();
            state.history = history.into_iter().chain(live).collect();
            while state.history.len() > self.config.history_limit {
                state.history.pop_front();
            }
        }
        *self
            .last_known
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = status.clone();
        if let Some(status) = &status {
            debug!(quality = %status.connection_quality, "Restored last known connection status");
        }
        status
    }

    /// Applies a connectivity change reported by the OS.
    ///
    /// Coming online triggers an immediate health check. A repeated
    /// online report is a no-op; the periodic timer keeps checking.
    pub async fn handle_network_change(&self, is_online: bool) -> ConnectionStatus {
        if is_online && self.lock_state().online == Some(true) {
            return self.status();
        }
        self.run_check(Some(is_online)).await
    }

    /// Runs a health check now.
    pub async fn force_health_check(&self) -> ConnectionStatus {
        self.run_check(None).await
    }

    /// Starts periodic checks. The first check runs immediately.
    pub fn start(self: &Arc<Self>) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let monitor = Arc::downgrade(self);
        let period = self.config.check_interval().max(MIN_CHECK_INTERVAL);
        info!(interval_secs = period.as_secs(), "Starting connection monitor");
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.force_health_check().await;
            }
        }));
    }

    /// Stops periodic checks.
    pub fn stop(&self) {
        if let Some(handle) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            debug!("Stopped connection monitor");
        }
    }

    /// Returns true while periodic checks are scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn run_check(&self, reported_online: Option<bool>) -> ConnectionStatus {
        let _serialized = self.check_lock.lock().await;

        let is_online = match reported_online {
            Some(online) => online,
            None => self.reachability.is_connected().await,
        };
        let probe = if is_online {
            Some(self.probe_backend().await)
        } else {
            None
        };

        let (status, changes, history) = self.apply(is_online, probe);
        self.persist(&status, &history).await;

        for change in &changes {
            info!(
                event = ?change.event,
                quality = %change.status.connection_quality,
                latency_ms = ?change.status.latency_ms,
                "Connection state changed"
            );
            self.listeners.notify(change);
            let _ = self.events.send(change.event);
        }
        status
    }

    async fn probe_backend(&self) -> Result<Duration, ProbeError> {
        let timeout = self.config.probe_timeout();
        match tokio::time::timeout(timeout, self.probe.probe()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        }
    }

    fn apply(
        &self,
        is_online: bool,
        probe: Option<Result<Duration, ProbeError>>,
    ) -> (ConnectionStatus, Vec<ConnectionChange>, Vec<ConnectionEventRecord>) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        let mut events = Vec::new();

        let mut status = state.status.clone();
        status.is_online = is_online;
        status.checked_at = Some(now);

        if let Some(event) = transition(
            state.online,
            is_online,
            ConnectionEvent::Online,
            ConnectionEvent::Offline,
        ) {
            events.push(event);
        }
        state.online = Some(is_online);

        match probe {
            // Reachability events stay keyed to probe results.
            None => {
                status.is_backend_reachable = false;
                status.connection_quality = ConnectionQuality::Offline;
                status.latency_ms = None;
            }
            Some(result) => {
                match result {
                    Ok(latency) => {
                        status.is_backend_reachable = true;
                        status.latency_ms =
                            Some(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
                        status.connection_quality =
                            ConnectionQuality::classify(true, Some(latency));
                        status.consecutive_failures = 0;
                        status.last_successful_connection_at = Some(now);
                    }
                    Err(e) => {
                        debug!(error = %e, "Health probe failed");
                        status.is_backend_reachable = false;
                        status.latency_ms = None;
                        status.connection_quality = ConnectionQuality::classify(true, None);
                        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    }
                }
                if let Some(event) = transition(
                    state.reachable,
                    status.is_backend_reachable,
                    ConnectionEvent::BackendRestored,
                    ConnectionEvent::BackendUnreachable,
                ) {
                    events.push(event);
                }
                state.reachable = Some(status.is_backend_reachable);
            }
        }

        for event in &events {
            state.history.push_back(ConnectionEventRecord {
                event: *event,
                at: now,
                quality: status.connection_quality,
                latency_ms: status.latency_ms,
            });
        }
        while state.history.len() > self.config.history_limit {
            state.history.pop_front();
        }

        state.status = status.clone();
        let changes = events
            .into_iter()
            .map(|event| ConnectionChange {
                event,
                status: status.clone(),
            })
            .collect();
        let history = state.history.iter().cloned().collect();
        (status, changes, history)
    }

    async fn persist(&self, status: &ConnectionStatus, history: &[ConnectionEventRecord]) {
        let encoded = serde_json::to_string(status)
            .and_then(|status| serde_json::to_string(history).map(|history| (status, history)));
        let (status, history) = match encoded {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "Failed to encode connection state");
                return;
            }
        };
        if let Err(e) = self
            .storage
            .multi_set(&[(STATUS_KEY, &status), (HISTORY_KEY, &history)])
            .await
        {
            warn!(error = %e, "Failed to persist connection state");
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Event for a change between two observations. From an unknown state only
/// the negative outcome is reported.
const fn transition(
    previous: Option<bool>,
    current: bool,
    up: ConnectionEvent,
    down: ConnectionEvent,
) -> Option<ConnectionEvent> {
    match (previous, current) {
        (Some(false), true) => Some(up),
        (Some(true) | None, false) => Some(down),
        _ => None,
    }
}
