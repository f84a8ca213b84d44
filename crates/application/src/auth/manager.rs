//! Auth session manager.
//!
//! Owns the process-wide [`Session`]. Every change goes through this type,
//! is persisted before it becomes visible, and is announced to listeners as
//! an immutable [`AuthSnapshot`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use sparkle_domain::{
    ApiError, ApiErrorKind, AuthSnapshot, AuthState, ProfileUpdate, Session, SessionConfig, User,
    normalize_phone, validate_otp,
};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::backend::{AuthApi, OtpChallenge};
use super::error::AuthError;
use super::token_store::{DEFAULT_REFRESH_BUFFER_SECS, TokenStatus, TokenStore};
use crate::http::SessionProvider;
use crate::observer::{Listeners, Subscription};
use crate::ports::Clock;
use crate::single_flight::SingleFlight;

const MIN_VALIDATION_INTERVAL: Duration = Duration::from_secs(1);

/// What a validation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// No authenticated session to validate.
    Skipped,
    /// A recent validation is still fresh.
    Throttled,
    /// The backend confirmed the session.
    Validated,
    /// The token was close to expiry and has been renewed.
    Refreshed,
    /// The check could not complete; the session was kept.
    Deferred,
    /// The backend rejected the session and it has been cleared.
    Expired,
}

struct Inner {
    state: AuthState,
    session: Session,
}

/// Owns the session and drives its lifecycle.
pub struct AuthSessionManager {
    api: Arc<dyn AuthApi>,
    store: TokenStore,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    inner: RwLock<Inner>,
    listeners: Listeners<AuthSnapshot>,
    refresh: SingleFlight<Result<String, ApiError>>,
    commit: tokio::sync::Mutex<()>,
    validation: Mutex<Option<JoinHandle<()>>>,
    validation_epoch: AtomicU64,
}

impl AuthSessionManager {
    /// Creates a manager in the `Uninitialized` state.
    #[must_use]
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: TokenStore,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            api,
            store,
            clock,
            config,
            inner: RwLock::new(Inner {
                state: AuthState::Uninitialized,
                session: Session::anonymous(),
            }),
            listeners: Listeners::new(),
            refresh: SingleFlight::new(),
            commit: tokio::sync::Mutex::new(()),
            validation: Mutex::new(None),
            validation_epoch: AtomicU64::new(0),
        }
    }

    /// Current state and session.
    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        let inner = self.read();
        AuthSnapshot {
            state: inner.state,
            session: inner.session.clone(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        self.read().state
    }

    /// Copy of the current session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.read().session.clone()
    }

    /// Returns true while signed in with backend credentials.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.read().state == AuthState::Authenticated
    }

    /// Registers a callback invoked after every state change.
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AuthSnapshot) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    /// Restores the persisted session.
    ///
    /// An expired session is refreshed when possible. Storage failures fall
    /// back to an anonymous session. Calling this again is a no-op.
    pub async fn initialize(self: &Arc<Self>) -> AuthSnapshot {
        {
            let mut inner = self.write();
            if inner.state != AuthState::Uninitialized {
                return AuthSnapshot {
                    state: inner.state,
                    session: inner.session.clone(),
                };
            }
            inner.state = AuthState::Loading;
        }
        self.listeners.notify(&self.snapshot());

        if let Some(stored) = self.store.load().await {
            let session = Session::from_stored(stored);
            let expired = session.is_expired(self.clock.now());
            let can_refresh = session.refresh_token().is_some();
            self.install(AuthState::Authenticated, session);

            if expired && can_refresh {
                info!("Stored session has expired; refreshing");
                if let Err(e) = self.refresh_session().await {
                    warn!(kind = %e.kind, "Could not refresh restored session");
                }
            } else if expired {
                info!("Stored session has expired and cannot be refreshed");
                self.expire().await;
            }
            if self.is_authenticated() {
                self.start_validation();
            }
            return self.snapshot();
        }

        if let Some(user) = self.store.load_guest().await {
            debug!(user_id = %user.id, "Restored guest session");
            return self.install(AuthState::Guest, Session::guest(user));
        }
        self.install(AuthState::Anonymous, Session::anonymous())
    }

    /// Requests a one-time code.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an unusable phone number, or the backend
    /// failure.
    pub async fn send_otp(&self, phone: &str) -> Result<OtpChallenge, AuthError> {
        let phone = normalize_phone(phone, &self.config.default_country_code)?;
        let challenge = self
            .api
            .send_otp(&phone)
            .await
            .inspect_err(|e| warn!(kind = %e.kind, "Failed to send verification code"))?;
        info!(phone = %mask_phone(&phone), "Verification code sent");
        Ok(challenge)
    }

    /// Verifies a one-time code and signs in.
    ///
    /// The new session is written to storage before it is installed, so a
    /// failed write leaves the previous state untouched.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput`, the backend failure, or `Persistence`.
    pub async fn verify_otp(
        self: &Arc<Self>,
        phone: &str,
        code: &str,
    ) -> Result<AuthSnapshot, AuthError> {
        let phone = normalize_phone(phone, &self.config.default_country_code)?;
        let code = validate_otp(code)?;
        let login = self
            .api
            .verify_otp(&phone, code)
            .await
            .inspect_err(|e| warn!(kind = %e.kind, "Verification failed"))?;

        let session = Session::authenticated(login.tokens, login.user, self.clock.now())
            .with_device_trusted(login.device_trusted);
        let stored = session
            .to_stored()
            .ok_or_else(|| AuthError::Persistence("incomplete session".to_string()))?;

        let snapshot = {
            let _commit = self.commit.lock().await;
            self.store.save(&stored).await.map_err(|e| {
                warn!(error = %e, "Failed to persist new session");
                AuthError::Persistence(e.to_string())
            })?;
            self.store.clear_guest().await;
            self.install(AuthState::Authenticated, session)
        };
        self.start_validation();

        info!(user_id = %stored.user.id, "Signed in");
        Ok(snapshot)
    }

    /// Starts a local-only guest session.
    ///
    /// # Errors
    ///
    /// Returns `AlreadySignedIn` when authenticated, or `Persistence`.
    pub async fn login_as_guest(&self) -> Result<AuthSnapshot, AuthError> {
        let _commit = self.commit.lock().await;
        match self.auth_state() {
            AuthState::Authenticated => return Err(AuthError::AlreadySignedIn),
            AuthState::Guest => return Ok(self.snapshot()),
            _ => {}
        }

        let user = User::guest();
        self.store
            .save_guest(&user)
            .await
            .map_err(|e| AuthError::Persistence(e.to_string()))?;
        info!(user_id = %user.id, "Started guest session");
        Ok(self.install(AuthState::Guest, Session::guest(user)))
    }

    /// Applies profile changes.
    ///
    /// Guests are updated locally; signed-in users through the backend.
    ///
    /// # Errors
    ///
    /// Returns `NotSignedIn` without a session, the backend failure, or
    /// `Persistence` when a guest record cannot be saved.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User, AuthError> {
        let current = self.snapshot();
        match current.state {
            AuthState::Guest => {
                let mut user = current.session.user().cloned().unwrap_or_else(User::guest);
                update.apply_to(&mut user);

                let _commit = self.commit.lock().await;
                self.store
                    .save_guest(&user)
                    .await
                    .map_err(|e| AuthError::Persistence(e.to_string()))?;
                self.install(AuthState::Guest, current.session.with_user(user.clone()));
                Ok(user)
            }
            AuthState::Authenticated => {
                if update.is_empty() {
                    return current.session.user().cloned().ok_or(AuthError::NotSignedIn);
                }
                let update = &update;
                let user = self
                    .authorized(|token| async move { self.api.update_profile(&token, update).await })
                    .await?;
                self.replace_user(user.clone(), false).await;
                Ok(user)
            }
            _ => Err(AuthError::NotSignedIn),
        }
    }

    /// Fetches the signed-in user from the backend and marks the session as
    /// validated.
    ///
    /// # Errors
    ///
    /// Returns `NotSignedIn` without a session, or the backend failure.
    pub async fn fetch_current_user(&self) -> Result<User, AuthError> {
        let current = self.snapshot();
        match current.state {
            AuthState::Guest => current.session.user().cloned().ok_or(AuthError::NotSignedIn),
            AuthState::Authenticated => {
                let user = self
                    .authorized(|token| async move { self.api.current_user(&token).await })
                    .await?;
                self.replace_user(user.clone(), true).await;
                Ok(user)
            }
            _ => Err(AuthError::NotSignedIn),
        }
    }

    /// Renews the access token. Concurrent callers share one backend call.
    ///
    /// A rejected refresh ends the session. A refresh that fails for any
    /// other reason keeps it.
    ///
    /// # Errors
    ///
    /// Returns an authentication error when the session was rejected, or
    /// the transient failure otherwise.
    pub async fn refresh_session(&self) -> Result<String, ApiError> {
        self.refresh.run(|| self.perform_refresh()).await
    }

    /// Checks the session against the backend, subject to throttling.
    pub async fn validate_session(&self) -> ValidationOutcome {
        let snapshot = self.snapshot();
        if snapshot.state != AuthState::Authenticated {
            return ValidationOutcome::Skipped;
        }

        let now = self.clock.now();
        if TokenStatus::of(&snapshot.session, now, DEFAULT_REFRESH_BUFFER_SECS).should_refresh() {
            return match self.refresh_session().await {
                Ok(_) => ValidationOutcome::Refreshed,
                Err(e) if e.is_authentication() => ValidationOutcome::Expired,
                Err(_) => ValidationOutcome::Deferred,
            };
        }

        let min_age =
            TimeDelta::from_std(self.config.min_revalidation()).unwrap_or(TimeDelta::MAX);
        if snapshot
            .session
            .last_validated_at()
            .is_some_and(|last| now - last < min_age)
        {
            return ValidationOutcome::Throttled;
        }

        match self.fetch_current_user().await {
            Ok(_) => ValidationOutcome::Validated,
            Err(_) if !self.is_authenticated() => ValidationOutcome::Expired,
            Err(e) => {
                debug!(error = %e, "Session validation deferred");
                ValidationOutcome::Deferred
            }
        }
    }

    /// Signs out. Idempotent.
    ///
    /// Local state is cleared and announced first. The backend is told
    /// afterwards on a best-effort basis.
    pub async fn logout(&self) -> AuthSnapshot {
        let (previous, snapshot) = {
            let _commit = self.commit.lock().await;
            let current = self.snapshot();
            if !matches!(current.state, AuthState::Authenticated | AuthState::Guest) {
                return current;
            }
            self.stop_validation();
            self.store.clear().await;
            let snapshot = self.install(AuthState::Anonymous, Session::anonymous());
            (current.session, snapshot)
        };
        info!("Signed out");

        if let Some(token) = previous.access_token()
            && let Err(e) = self.api.logout(token).await
        {
            warn!(kind = %e.kind, "Backend logout failed; local session already cleared");
        }
        snapshot
    }

    /// Stops background work.
    pub fn shutdown(&self) {
        self.stop_validation();
    }

    /// Returns true while the validation loop is scheduled.
    #[must_use]
    pub fn is_validating(&self) -> bool {
        self.validation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn start_validation(self: &Arc<Self>) {
        let mut slot = self.validation.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let epoch = self.validation_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let manager = Arc::downgrade(self);
        let period = self.config.validation_interval().max(MIN_VALIDATION_INTERVAL);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if manager.validation_epoch.load(Ordering::SeqCst) != epoch {
                    break;
                }
                let outcome = manager.validate_session().await;
                debug!(?outcome, "Session validation tick");
            }
        }));
    }

    /// Cancels the validation loop.
    fn stop_validation(&self) {
        self.validation_epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self
            .validation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// Lets the validation loop exit on its next tick. Safe to call from
    /// inside the loop.
    fn retire_validation(&self) {
        self.validation_epoch.fetch_add(1, Ordering::SeqCst);
        self.validation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    async fn perform_refresh(&self) -> Result<String, ApiError> {
        let session = {
            let inner = self.read();
            if inner.state != AuthState::Authenticated {
                return Err(ApiError::authentication("No session to refresh"));
            }
            inner.session.clone()
        };
        let Some(refresh_token) = session.refresh_token().map(str::to_string) else {
            warn!("Session has no refresh token; ending session");
            self.expire().await;
            return Err(ApiError::authentication(
                ApiErrorKind::Authentication.default_message(),
            ));
        };

        match self.api.refresh(&refresh_token).await {
            Ok(mut tokens) => {
                if tokens.refresh_token.is_none() {
                    tokens.refresh_token = Some(refresh_token.clone());
                }
                let access_token = tokens.access_token.clone();
                let refreshed = session.with_tokens(tokens).validated_at(self.clock.now());

                let _commit = self.commit.lock().await;
                if !self.holds_refresh_token(&refresh_token) {
                    return Err(ApiError::authentication("Session changed during refresh"));
                }
                if let Some(stored) = refreshed.to_stored()
                    && let Err(e) = self.store.save(&stored).await
                {
                    warn!(error = %e, "Failed to persist refreshed session");
                }
                self.install(AuthState::Authenticated, refreshed);
                info!("Session refreshed");
                Ok(access_token)
            }
            Err(error)
                if matches!(
                    error.kind,
                    ApiErrorKind::Authentication | ApiErrorKind::Validation | ApiErrorKind::Client
                ) =>
            {
                warn!(kind = %error.kind, "Refresh rejected; ending session");
                if self.holds_refresh_token(&refresh_token) {
                    self.expire().await;
                }
                Err(ApiError {
                    kind: ApiErrorKind::Authentication,
                    ..error
                })
            }
            Err(error) => {
                warn!(kind = %error.kind, "Refresh failed; keeping session");
                Err(error)
            }
        }
    }

    /// Runs an authenticated backend call, refreshing once on 401.
    async fn authorized<T, F, Fut>(&self, call: F) -> Result<T, ApiError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let token = self
            .read()
            .session
            .access_token()
            .map(str::to_string)
            .ok_or_else(|| ApiError::authentication("Not signed in"))?;
        match call(token).await {
            Err(error) if error.status_code == Some(401) => {
                let fresh = self.refresh_session().await?;
                call(fresh).await
            }
            result => result,
        }
    }

    async fn replace_user(&self, user: User, validated: bool) {
        let _commit = self.commit.lock().await;
        let current = self.snapshot();
        if current.state != AuthState::Authenticated {
            return;
        }
        let mut session = current.session.with_user(user);
        if validated {
            session = session.validated_at(self.clock.now());
        }
        if let Some(stored) = session.to_stored()
            && let Err(e) = self.store.save(&stored).await
        {
            warn!(error = %e, "Failed to persist updated session");
        }
        self.install(AuthState::Authenticated, session);
    }

    async fn expire(&self) {
        self.retire_validation();
        self.install(AuthState::Anonymous, Session::anonymous());
        self.store.clear().await;
        info!("Session expired");
    }

    fn holds_refresh_token(&self, refresh_token: &str) -> bool {
        let inner = self.read();
        inner.state == AuthState::Authenticated
            && inner.session.refresh_token() == Some(refresh_token)
    }

    fn install(&self, state: AuthState, session: Session) -> AuthSnapshot {
        let snapshot = {
            let mut inner = self.write();
            inner.state = state;
            inner.session = session;
            AuthSnapshot {
                state,
                session: inner.session.clone(),
            }
        };
        self.listeners.notify(&snapshot);
        snapshot
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionProvider for AuthSessionManager {
    async fn access_token(&self) -> Option<String> {
        self.refresh.join().await;
        self.read().session.access_token().map(str::to_string)
    }

    async fn refresh_access_token(&self) -> Result<String, ApiError> {
        self.refresh_session().await
    }

    async fn join_refresh(&self) -> Option<Result<String, ApiError>> {
        self.refresh.join().await
    }
}

impl Drop for AuthSessionManager {
    fn drop(&mut self) {
        self.stop_validation();
    }
}

impl std::fmt::Debug for AuthSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSessionManager")
            .field("state", &self.auth_state())
            .finish_non_exhaustive()
    }
}

fn mask_phone(phone: &str) -> String {
    let visible: String = phone
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{visible}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::backend::VerifiedLogin;
    use crate::auth::token_store::{GUEST_KEY, SESSION_KEY};
    use crate::ports::{KeyValueStorage, ManualClock};
    use crate::test_support::MemoryStorage;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use sparkle_domain::{AuthTokens, StoredSession, UserRole};
    use std::sync::atomic::AtomicUsize;

    struct FakeAuthApi {
        refresh_result: Mutex<Result<AuthTokens, ApiError>>,
        current_user_result: Mutex<Result<User, ApiError>>,
        logout_result: Mutex<Result<(), ApiError>>,
        refresh_delay: Mutex<Duration>,
        logout_delay: Mutex<Duration>,
        verify_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        current_user_calls: AtomicUsize,
        logout_calls: AtomicUsize,
    }

    impl FakeAuthApi {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                refresh_result: Mutex::new(Ok(tokens("access-2", None))),
                current_user_result: Mutex::new(Ok(user())),
                logout_result: Mutex::new(Ok(())),
                refresh_delay: Mutex::new(Duration::ZERO),
                logout_delay: Mutex::new(Duration::ZERO),
                verify_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
                current_user_calls: AtomicUsize::new(0),
                logout_calls: AtomicUsize::new(0),
            })
        }

        fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthApi for FakeAuthApi {
        async fn send_otp(&self, phone: &str) -> Result<OtpChallenge, ApiError> {
            Ok(OtpChallenge {
                phone: phone.to_string(),
                message: Some("sent".to_string()),
                expires_in_secs: Some(300),
            })
        }

        async fn verify_otp(&self, phone: &str, code: &str) -> Result<VerifiedLogin, ApiError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            if code != "123456" {
                return Err(ApiError::from_response(
                    401,
                    None,
                    Some(&serde_json::json!({"message": "Invalid code"})),
                ));
            }
            let mut user = user();
            user.phone = Some(phone.to_string());
            Ok(VerifiedLogin {
                tokens: tokens("access-1", Some("refresh-1")),
                user,
                device_trusted: true,
            })
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<AuthTokens, ApiError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.refresh_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.refresh_result.lock().unwrap().clone()
        }

        async fn current_user(&self, _access_token: &str) -> Result<User, ApiError> {
            self.current_user_calls.fetch_add(1, Ordering::SeqCst);
            self.current_user_result.lock().unwrap().clone()
        }

        async fn update_profile(
            &self,
            _access_token: &str,
            update: &ProfileUpdate,
        ) -> Result<User, ApiError> {
            let mut user = user();
            update.apply_to(&mut user);
            Ok(user)
        }

        async fn logout(&self, _access_token: &str) -> Result<(), ApiError> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.logout_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.logout_result.lock().unwrap().clone()
        }
    }

    fn tokens(access: &str, refresh: Option<&str>) -> AuthTokens {
        AuthTokens {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at: None,
        }
    }

    fn user() -> User {
        User {
            id: "user-1".to_string(),
            phone: None,
            name: Some("Asha".to_string()),
            email: None,
            role: UserRole::Customer,
            avatar_url: None,
            is_guest: false,
        }
    }

    struct Fixture {
        manager: Arc<AuthSessionManager>,
        api: Arc<FakeAuthApi>,
        storage: Arc<MemoryStorage>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_storage(Arc::new(MemoryStorage::default()))
        }

        fn with_storage(storage: Arc<MemoryStorage>) -> Self {
            let api = FakeAuthApi::new();
            let clock = Arc::new(ManualClock::default());
            let manager = Arc::new(AuthSessionManager::new(
                api.clone(),
                TokenStore::new(storage.clone()),
                clock.clone(),
                SessionConfig::default(),
            ));
            Self {
                manager,
                api,
                storage,
                clock,
            }
        }

        async fn signed_in() -> Self {
            let f = Self::new();
            f.manager.initialize().await;
            f.manager.verify_otp("9876543210", "123456").await.unwrap();
            f
        }
    }

    async fn store_session(storage: &MemoryStorage, expires_at: Option<DateTime<Utc>>) {
        let stored = StoredSession {
            tokens: AuthTokens {
                access_token: "stored-access".to_string(),
                refresh_token: Some("stored-refresh".to_string()),
                expires_at,
            },
            user: user(),
            last_validated_at: None,
            device_trusted: false,
        };
        storage
            .set(SESSION_KEY, &serde_json::to_string(&stored).unwrap())
            .await
            .unwrap();
    }

    fn record_states(manager: &AuthSessionManager) -> Arc<Mutex<Vec<AuthSnapshot>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = manager.add_listener(move |snapshot| {
            sink.lock().unwrap().push(snapshot.clone());
        });
        seen
    }

    #[tokio::test]
    async fn test_initialize_without_stored_session() {
        let f = Fixture::new();
        let seen = record_states(&f.manager);

        let snapshot = f.manager.initialize().await;

        assert_eq!(snapshot.state, AuthState::Anonymous);
        let states: Vec<_> = seen.lock().unwrap().iter().map(|s| s.state).collect();
        assert_eq!(states, vec![AuthState::Loading, AuthState::Anonymous]);
        assert_eq!(f.manager.initialize().await.state, AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_initialize_tolerates_unreadable_storage() {
        let storage = Arc::new(MemoryStorage::default());
        storage.fail_reads(true);
        let f = Fixture::with_storage(storage);

        assert_eq!(f.manager.initialize().await.state, AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_send_otp_normalizes_phone() {
        let f = Fixture::new();

        let challenge = f.manager.send_otp("098765 43210").await.unwrap();

        assert_eq!(challenge.phone, "+919876543210");
        let error = f.manager.send_otp("12").await.unwrap_err();
        assert!(matches!(error, AuthError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_verify_otp_installs_session_atomically() {
        let f = Fixture::new();
        f.manager.initialize().await;
        let seen = record_states(&f.manager);

        let snapshot = f.manager.verify_otp("9876543210", "123456").await.unwrap();

        assert_eq!(snapshot.state, AuthState::Authenticated);
        assert!(snapshot.session.is_authenticated());
        assert_eq!(snapshot.session.user().unwrap().id, "user-1");
        assert!(snapshot.session.device_trusted());
        for observed in seen.lock().unwrap().iter() {
            assert_eq!(
                observed.session.is_authenticated(),
                observed.session.user().is_some()
            );
        }
        assert!(f.storage.raw(SESSION_KEY).is_some());
        assert!(f.manager.is_validating());
    }

    #[tokio::test]
    async fn test_verify_otp_rejects_bad_input_locally() {
        let f = Fixture::new();

        let error = f.manager.verify_otp("9876543210", "12").await.unwrap_err();

        assert!(matches!(error, AuthError::InvalidInput(_)));
        assert_eq!(FakeAuthApi::count(&f.api.verify_calls), 0);
    }

    #[tokio::test]
    async fn test_verify_otp_backend_rejection() {
        let f = Fixture::new();
        f.manager.initialize().await;

        let error = f.manager.verify_otp("9876543210", "000000").await.unwrap_err();

        assert_eq!(error.api_kind(), Some(ApiErrorKind::Authentication));
        assert_eq!(error.user_message(), "Invalid code");
        assert_eq!(f.manager.auth_state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_verify_otp_persistence_failure_changes_nothing() {
        let f = Fixture::new();
        f.manager.initialize().await;
        let seen = record_states(&f.manager);
        f.storage.fail_writes(true);

        let error = f.manager.verify_otp("9876543210", "123456").await.unwrap_err();

        assert!(matches!(error, AuthError::Persistence(_)));
        assert_eq!(f.manager.auth_state(), AuthState::Anonymous);
        assert!(!f.manager.session().is_authenticated());
        assert!(seen.lock().unwrap().is_empty());
        assert!(!f.manager.is_validating());
    }

    #[tokio::test]
    async fn test_session_round_trips_through_storage() {
        let first = Fixture::signed_in().await;
        let original = first.manager.session();
        first.manager.shutdown();

        let second = Fixture::with_storage(first.storage.clone());
        let snapshot = second.manager.initialize().await;

        assert_eq!(snapshot.state, AuthState::Authenticated);
        assert_eq!(snapshot.session.user().unwrap().id, original.user().unwrap().id);
        assert_eq!(snapshot.session.tokens(), original.tokens());
        assert_eq!(FakeAuthApi::count(&second.api.refresh_calls), 0);
    }

    #[tokio::test]
    async fn test_expired_stored_session_is_refreshed() {
        let storage = Arc::new(MemoryStorage::default());
        store_session(&storage, Some(Utc::now() - TimeDelta::minutes(5))).await;
        let f = Fixture::with_storage(storage);

        let snapshot = f.manager.initialize().await;

        assert_eq!(snapshot.state, AuthState::Authenticated);
        assert_eq!(snapshot.session.access_token(), Some("access-2"));
        assert_eq!(snapshot.session.refresh_token(), Some("stored-refresh"));
        assert_eq!(FakeAuthApi::count(&f.api.refresh_calls), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_ends_session() {
        let f = Fixture::signed_in().await;
        *f.api.refresh_result.lock().unwrap() = Err(ApiError::authentication("revoked"));
        let seen = record_states(&f.manager);

        let error = f.manager.refresh_session().await.unwrap_err();

        assert_eq!(error.kind, ApiErrorKind::Authentication);
        assert_eq!(f.manager.auth_state(), AuthState::Anonymous);
        assert_eq!(f.storage.raw(SESSION_KEY), None);
        assert_eq!(
            seen.lock().unwrap().last().map(|s| s.state),
            Some(AuthState::Anonymous)
        );
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_keeps_session() {
        let f = Fixture::signed_in().await;
        *f.api.refresh_result.lock().unwrap() = Err(ApiError::network("offline"));

        let error = f.manager.refresh_session().await.unwrap_err();

        assert_eq!(error.kind, ApiErrorKind::Network);
        assert_eq!(f.manager.auth_state(), AuthState::Authenticated);
        assert_eq!(f.manager.session().access_token(), Some("access-1"));
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_call() {
        let f = Fixture::signed_in().await;
        *f.api.refresh_delay.lock().unwrap() = Duration::from_millis(50);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = Arc::clone(&f.manager);
            handles.push(tokio::spawn(async move { manager.refresh_session().await }));
        }
        let waiter = {
            let manager = Arc::clone(&f.manager);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                manager.access_token().await
            })
        };

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "access-2");
        }
        assert_eq!(waiter.await.unwrap().as_deref(), Some("access-2"));
        assert_eq!(FakeAuthApi::count(&f.api.refresh_calls), 1);
        assert_eq!(
            f.manager.session().refresh_token(),
            Some("refresh-1"),
            "refresh token is kept when the backend does not rotate it"
        );
    }

    #[tokio::test]
    async fn test_joined_refresh_reports_failure() {
        let f = Fixture::signed_in().await;
        *f.api.refresh_delay.lock().unwrap() = Duration::from_millis(50);
        *f.api.refresh_result.lock().unwrap() = Err(ApiError::network("offline"));

        let leader = {
            let manager = Arc::clone(&f.manager);
            tokio::spawn(async move { manager.refresh_session().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let joined = f.manager.join_refresh().await;

        assert_eq!(joined.unwrap().unwrap_err().kind, ApiErrorKind::Network);
        assert_eq!(leader.await.unwrap().unwrap_err().kind, ApiErrorKind::Network);
        assert_eq!(FakeAuthApi::count(&f.api.refresh_calls), 1);
        assert!(f.manager.join_refresh().await.is_none());
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let f = Fixture::signed_in().await;

        let first = f.manager.logout().await;
        let second = f.manager.logout().await;

        assert_eq!(first, second);
        assert_eq!(first.state, AuthState::Anonymous);
        assert_eq!(FakeAuthApi::count(&f.api.logout_calls), 1);
        assert_eq!(f.storage.raw(SESSION_KEY), None);
        assert!(!f.manager.is_validating());
    }

    #[tokio::test]
    async fn test_logout_clears_locally_when_backend_fails() {
        let f = Fixture::signed_in().await;
        *f.api.logout_result.lock().unwrap() = Err(ApiError::network("offline"));

        let snapshot = f.manager.logout().await;

        assert_eq!(snapshot.state, AuthState::Anonymous);
        assert_eq!(f.storage.raw(SESSION_KEY), None);
    }

    #[tokio::test]
    async fn test_sign_in_during_slow_backend_logout_survives() {
        let f = Fixture::signed_in().await;
        *f.api.logout_delay.lock().unwrap() = Duration::from_millis(200);
        let states = record_states(&f.manager);

        let logout = {
            let manager = Arc::clone(&f.manager);
            tokio::spawn(async move { manager.logout().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.manager.auth_state(), AuthState::Anonymous);
        assert_eq!(f.storage.raw(SESSION_KEY), None);

        f.manager.verify_otp("9876543210", "123456").await.unwrap();
        let signed_out = logout.await.unwrap();

        assert_eq!(signed_out.state, AuthState::Anonymous);
        assert_eq!(f.manager.auth_state(), AuthState::Authenticated);
        assert!(f.storage.raw(SESSION_KEY).is_some());
        assert!(f.manager.is_validating());
        assert_eq!(
            states.lock().unwrap().last().map(|s| s.state),
            Some(AuthState::Authenticated)
        );
    }

    #[tokio::test]
    async fn test_guest_profile_update_stays_local() {
        let f = Fixture::new();
        f.manager.initialize().await;

        let snapshot = f.manager.login_as_guest().await.unwrap();
        assert_eq!(snapshot.state, AuthState::Guest);
        assert!(snapshot.session.tokens().is_none());
        assert!(!f.manager.is_validating());

        let updated = f
            .manager
            .update_profile(ProfileUpdate {
                name: Some("Meera".to_string()),
                ..ProfileUpdate::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.name.as_deref(), Some("Meera"));
        assert!(updated.is_guest);
        let stored: User = serde_json::from_str(&f.storage.raw(GUEST_KEY).unwrap()).unwrap();
        assert_eq!(stored, updated);
        assert_eq!(f.manager.validate_session().await, ValidationOutcome::Skipped);
        assert!(f.manager.refresh_session().await.is_err());
        assert_eq!(FakeAuthApi::count(&f.api.refresh_calls), 0);
    }

    #[tokio::test]
    async fn test_guest_session_is_restored() {
        let first = Fixture::new();
        first.manager.initialize().await;
        let guest = first.manager.login_as_guest().await.unwrap();

        let second = Fixture::with_storage(first.storage.clone());
        let snapshot = second.manager.initialize().await;

        assert_eq!(snapshot.state, AuthState::Guest);
        assert_eq!(snapshot.session.user(), guest.session.user());
    }

    #[tokio::test]
    async fn test_guest_login_while_signed_in_is_rejected() {
        let f = Fixture::signed_in().await;

        let error = f.manager.login_as_guest().await.unwrap_err();

        assert_eq!(error, AuthError::AlreadySignedIn);
        assert_eq!(f.manager.auth_state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_update_profile_requires_session() {
        let f = Fixture::new();
        f.manager.initialize().await;

        let error = f
            .manager
            .update_profile(ProfileUpdate::default())
            .await
            .unwrap_err();

        assert_eq!(error, AuthError::NotSignedIn);
    }

    #[tokio::test]
    async fn test_update_profile_when_signed_in() {
        let f = Fixture::signed_in().await;

        let user = f
            .manager
            .update_profile(ProfileUpdate {
                email: Some("asha@example.com".to_string()),
                ..ProfileUpdate::default()
            })
            .await
            .unwrap();

        assert_eq!(user.email.as_deref(), Some("asha@example.com"));
        assert_eq!(
            f.manager.session().user().unwrap().email.as_deref(),
            Some("asha@example.com")
        );
    }

    #[tokio::test]
    async fn test_validation_is_throttled() {
        let f = Fixture::signed_in().await;

        assert_eq!(f.manager.validate_session().await, ValidationOutcome::Throttled);
        assert_eq!(FakeAuthApi::count(&f.api.current_user_calls), 0);

        f.clock.advance(Duration::from_secs(301));
        assert_eq!(f.manager.validate_session().await, ValidationOutcome::Validated);
        assert_eq!(FakeAuthApi::count(&f.api.current_user_calls), 1);
        assert_eq!(f.manager.validate_session().await, ValidationOutcome::Throttled);
    }

    #[tokio::test]
    async fn test_validation_refreshes_expiring_token() {
        let f = Fixture::new();
        store_session(&f.storage, Some(Utc::now() + TimeDelta::seconds(30))).await;
        f.manager.initialize().await;

        assert_eq!(f.manager.validate_session().await, ValidationOutcome::Refreshed);
        assert_eq!(f.manager.session().access_token(), Some("access-2"));
    }

    #[tokio::test]
    async fn test_validation_expires_rejected_session() {
        let f = Fixture::signed_in().await;
        f.clock.advance(Duration::from_secs(301));
        *f.api.current_user_result.lock().unwrap() = Err(ApiError::authentication("expired"));
        *f.api.refresh_result.lock().unwrap() = Err(ApiError::authentication("revoked"));

        assert_eq!(f.manager.validate_session().await, ValidationOutcome::Expired);
        assert_eq!(f.manager.auth_state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_validation_defers_on_network_failure() {
        let f = Fixture::signed_in().await;
        f.clock.advance(Duration::from_secs(301));
        *f.api.current_user_result.lock().unwrap() = Err(ApiError::network("offline"));

        assert_eq!(f.manager.validate_session().await, ValidationOutcome::Deferred);
        assert_eq!(f.manager.auth_state(), AuthState::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_loop_runs_until_logout() {
        let f = Fixture::signed_in().await;
        f.clock.advance(Duration::from_secs(600));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(FakeAuthApi::count(&f.api.current_user_calls), 1);

        f.manager.logout().await;
        f.clock.advance(Duration::from_secs(600));
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(FakeAuthApi::count(&f.api.current_user_calls), 1);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_block_others() {
        let f = Fixture::new();
        f.manager.initialize().await;
        let _bad = f.manager.add_listener(|_| panic!("listener failure"));
        let seen = record_states(&f.manager);

        f.manager.login_as_guest().await.unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(f.manager.auth_state(), AuthState::Guest);
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+919876543210"), "***3210");
        assert_eq!(mask_phone("12"), "***12");
    }
}
