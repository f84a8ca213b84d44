//! Wiring of the connection layer.
//!
//! [`ClientStack`] builds every service from a [`ClientConfig`] and owns the
//! background tasks that keep them running.

use std::sync::{Arc, Mutex, PoisonError};

use sparkle_application::auth::{AuthSessionManager, BackendAuthApi, TokenStore};
use sparkle_application::connection::ConnectionMonitor;
use sparkle_application::device_identity::StoredDeviceIdentity;
use sparkle_application::http::{ApiClient, RequestPipeline, SessionProvider};
use sparkle_application::ports::{Clock, KeyValueStorage, NetworkReachability, SystemClock};
use sparkle_domain::{AuthSnapshot, ClientConfig, DomainError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::adapters::{ReqwestHealthProbe, ReqwestTransport, TcpReachability};
use crate::persistence::FileKeyValueStorage;

/// Errors raised while assembling the stack.
#[derive(Debug, Error)]
pub enum StackError {
    /// A configured URL is unusable.
    #[error("invalid configuration: {0}")]
    Config(#[from] DomainError),

    /// The HTTP client could not be created.
    #[error("failed to create HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// The assembled connection layer.
pub struct ClientStack {
    config: Arc<ClientConfig>,
    storage: Arc<dyn KeyValueStorage>,
    monitor: Arc<ConnectionMonitor>,
    session: Arc<AuthSessionManager>,
    client: Arc<ApiClient>,
    drainer: Mutex<Option<JoinHandle<()>>>,
}

impl ClientStack {
    /// Builds the stack with file storage and TCP reachability checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn build(config: ClientConfig) -> Result<Self, StackError> {
        let storage = Arc::new(FileKeyValueStorage::new(&config.storage_path));
        let reachability = Arc::new(TcpReachability::new(
            config.health.reachability_target.clone(),
            config.health.probe_timeout(),
        ));
        Self::with_parts(config, storage, reachability)
    }

    /// Builds the stack around the given storage and reachability check.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn with_parts(
        config: ClientConfig,
        storage: Arc<dyn KeyValueStorage>,
        reachability: Arc<dyn NetworkReachability>,
    ) -> Result<Self, StackError> {
        let config = Arc::new(config);
        let http = reqwest::Client::builder()
            .user_agent(format!("sparkle/{}", config.client_version))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let probe = Arc::new(ReqwestHealthProbe::new(
            http.clone(),
            config.resolve_url(&config.endpoints.health)?,
            config.health.probe_timeout(),
        ));
        let monitor = Arc::new(ConnectionMonitor::new(
            reachability,
            probe,
            Arc::clone(&storage),
            Arc::clone(&clock),
            config.health.clone(),
        ));

        let device = Arc::new(StoredDeviceIdentity::new(Arc::clone(&storage)));
        let pipeline = RequestPipeline::new(
            Arc::clone(&config),
            Arc::new(ReqwestTransport::with_client(http)),
            device,
        );
        let session = Arc::new(AuthSessionManager::new(
            Arc::new(BackendAuthApi::new(pipeline.clone(), Arc::clone(&clock))),
            TokenStore::new(Arc::clone(&storage)),
            Arc::clone(&clock),
            config.session.clone(),
        ));
        let provider: Arc<dyn SessionProvider> = session.clone();
        let client = Arc::new(ApiClient::new(pipeline, provider, Arc::clone(&monitor), clock));

        Ok(Self {
            config,
            storage,
            monitor,
            session,
            client,
            drainer: Mutex::new(None),
        })
    }

    /// Restores persisted state and starts background work.
    ///
    /// Returns the session state after restoration. Calling this again only
    /// restarts tasks that have stopped.
    pub async fn start(&self) -> AuthSnapshot {
        if !self.monitor.is_running() {
            self.monitor.restore().await;
            self.monitor.start();
        }
        let snapshot = self.session.initialize().await;

        let mut drainer = self.drainer.lock().unwrap_or_else(PoisonError::into_inner);
        if drainer.as_ref().is_none_or(JoinHandle::is_finished) {
            *drainer = Some(self.client.spawn_queue_drainer());
        }
        info!(
            base_url = %self.config.base_url,
            auth_state = %snapshot.state,
            "Client stack started"
        );
        snapshot
    }

    /// Stops background work. Persisted state is left as is.
    pub fn shutdown(&self) {
        self.monitor.stop();
        self.session.shutdown();
        if let Some(handle) = self
            .drainer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Storage shared by every service.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.storage
    }

    /// Connection monitor.
    #[must_use]
    pub const fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    /// Session manager.
    #[must_use]
    pub const fn session(&self) -> &Arc<AuthSessionManager> {
        &self.session
    }

    /// API client for application requests.
    #[must_use]
    pub const fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }
}

impl Drop for ClientStack {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ClientStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStack")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}
