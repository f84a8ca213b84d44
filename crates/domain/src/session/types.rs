//! Session domain types.
//!
//! A `Session` can only be built through its constructors, which keep two
//! invariants: an authenticated session always has a user, and a guest
//! session never holds tokens.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::generate_guest_id;

/// Role of a user on the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Performs services.
    Professional,
    /// Manages bookings, offers and professionals.
    Admin,
    /// Books services. Unrecognized roles fall back to this.
    #[default]
    #[serde(other)]
    Customer,
}

/// A user record, either from the backend or synthesized for a guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Backend id, or a local `guest_` id.
    #[serde(alias = "_id")]
    pub id: String,
    /// Phone number in normalized form.
    #[serde(default)]
    pub phone: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Marketplace role.
    #[serde(default)]
    pub role: UserRole,
    /// Profile picture.
    #[serde(default, alias = "avatarUrl")]
    pub avatar_url: Option<String>,
    /// True for locally synthesized guest records.
    #[serde(default)]
    pub is_guest: bool,
}

impl User {
    /// Synthesizes a local guest record.
    #[must_use]
    pub fn guest() -> Self {
        Self {
            id: generate_guest_id(),
            phone: None,
            name: Some("Guest".to_string()),
            email: None,
            role: UserRole::Customer,
            avatar_url: None,
            is_guest: true,
        }
    }
}

/// Fields a user may change on their profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// New profile picture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfileUpdate {
    /// Returns true if nothing would change.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.avatar_url.is_none()
    }

    /// Applies the set fields to a user record.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = Some(name.clone());
        }
        if let Some(email) = &self.email {
            user.email = Some(email.clone());
        }
        if let Some(avatar_url) = &self.avatar_url {
            user.avatar_url = Some(avatar_url.clone());
        }
    }
}

/// Credentials issued by the backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    /// Bearer token for API calls.
    pub access_token: String,
    /// Token used to obtain a new access token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// When the access token stops being accepted.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthTokens {
    /// Returns true if the access token has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// Returns a log-safe preview of a token (first 8 chars + ...).
    #[must_use]
    pub fn preview(token: &str) -> String {
        if token.chars().count() > 12 {
            format!("{}...", token.chars().take(8).collect::<String>())
        } else {
            "***".to_string()
        }
    }
}

impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &Self::preview(&self.access_token))
            .field(
                "refresh_token",
                &self.refresh_token.as_deref().map(Self::preview),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The persisted form of an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Issued credentials.
    pub tokens: AuthTokens,
    /// The signed-in user.
    pub user: User,
    /// Last successful backend validation.
    #[serde(default)]
    pub last_validated_at: Option<DateTime<Utc>>,
    /// Whether the backend marked this device as trusted.
    #[serde(default)]
    pub device_trusted: bool,
}

/// The process's authentication state and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    tokens: Option<AuthTokens>,
    user: Option<User>,
    last_validated_at: Option<DateTime<Utc>>,
    is_authenticated: bool,
    is_guest: bool,
    device_trusted: bool,
}

impl Session {
    /// A session with no user and no credentials.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A signed-in session.
    #[must_use]
    pub fn authenticated(tokens: AuthTokens, user: User, validated_at: DateTime<Utc>) -> Self {
        Self {
            tokens: Some(tokens),
            user: Some(user),
            last_validated_at: Some(validated_at),
            is_authenticated: true,
            is_guest: false,
            device_trusted: false,
        }
    }

    /// A local-only guest session. Never holds tokens.
    #[must_use]
    pub fn guest(mut user: User) -> Self {
        user.is_guest = true;
        Self {
            tokens: None,
            user: Some(user),
            last_validated_at: None,
            is_authenticated: false,
            is_guest: true,
            device_trusted: false,
        }
    }

    /// Rebuilds a session from storage.
    #[must_use]
    pub fn from_stored(stored: StoredSession) -> Self {
        Self {
            tokens: Some(stored.tokens),
            user: Some(stored.user),
            last_validated_at: stored.last_validated_at,
            is_authenticated: true,
            is_guest: false,
            device_trusted: stored.device_trusted,
        }
    }

    /// The persisted form, if this session is authenticated.
    #[must_use]
    pub fn to_stored(&self) -> Option<StoredSession> {
        match (&self.tokens, &self.user, self.is_authenticated) {
            (Some(tokens), Some(user), true) => Some(StoredSession {
                tokens: tokens.clone(),
                user: user.clone(),
                last_validated_at: self.last_validated_at,
                device_trusted: self.device_trusted,
            }),
            _ => None,
        }
    }

    /// Returns a copy with new credentials, keeping the user.
    #[must_use]
    pub fn with_tokens(&self, tokens: AuthTokens) -> Self {
        Self {
            tokens: Some(tokens),
            ..self.clone()
        }
    }

    /// Returns a copy with a replaced user record.
    #[must_use]
    pub fn with_user(&self, mut user: User) -> Self {
        user.is_guest = self.is_guest;
        Self {
            user: Some(user),
            ..self.clone()
        }
    }

    /// Returns a copy stamped as validated at `at`.
    #[must_use]
    pub fn validated_at(&self, at: DateTime<Utc>) -> Self {
        Self {
            last_validated_at: Some(at),
            ..self.clone()
        }
    }

    /// Returns a copy with the device trust flag set.
    #[must_use]
    pub fn with_device_trusted(&self, device_trusted: bool) -> Self {
        Self {
            device_trusted,
            ..self.clone()
        }
    }

    /// Bearer token, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access_token.as_str())
    }

    /// Refresh token, if any.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens.as_ref().and_then(|t| t.refresh_token.as_deref())
    }

    /// Credentials, if any.
    #[must_use]
    pub const fn tokens(&self) -> Option<&AuthTokens> {
        self.tokens.as_ref()
    }

    /// Access token expiry.
    #[must_use]
    pub fn session_expiry(&self) -> Option<DateTime<Utc>> {
        self.tokens.as_ref().and_then(|t| t.expires_at)
    }

    /// Current user.
    #[must_use]
    pub const fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Last successful validation.
    #[must_use]
    pub const fn last_validated_at(&self) -> Option<DateTime<Utc>> {
        self.last_validated_at
    }

    /// True for signed-in sessions.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    /// True for guest sessions.
    #[must_use]
    pub const fn is_guest(&self) -> bool {
        self.is_guest
    }

    /// Whether the backend trusts this device.
    #[must_use]
    pub const fn device_trusted(&self) -> bool {
        self.device_trusted
    }

    /// True if the access token has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.tokens.as_ref().is_some_and(|t| t.is_expired(now))
    }
}

/// Lifecycle state of the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// Nothing loaded yet.
    #[default]
    Uninitialized,
    /// Restoring from storage.
    Loading,
    /// Signed in with tokens.
    Authenticated,
    /// No user.
    Anonymous,
    /// Local guest user.
    Guest,
}

impl AuthState {
    /// Returns true once initialization has finished.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Authenticated | Self::Anonymous | Self::Guest)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Authenticated => "authenticated",
            Self::Anonymous => "anonymous",
            Self::Guest => "guest",
        };
        f.write_str(name)
    }
}

/// Immutable view handed to session observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    /// Manager state.
    pub state: AuthState,
    /// Session at the time of the transition.
    pub session: Session,
}
