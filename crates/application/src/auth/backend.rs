//! Backend authentication endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use serde::Deserialize;
use serde_json::{Value, json};
use sparkle_domain::{
    ApiError, ApiErrorKind, ApiResponse, AuthTokens, HttpMethod, ProfileUpdate, RequestDescriptor,
    RequestOptions, User,
};

use crate::http::RequestPipeline;
use crate::ports::Clock;

/// Result of requesting a one-time code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    /// Normalized phone number the code was sent to.
    pub phone: String,
    /// Message from the backend.
    pub message: Option<String>,
    /// How long the code stays valid.
    pub expires_in_secs: Option<u64>,
}

/// Credentials and user returned by a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedLogin {
    /// Issued tokens.
    pub tokens: AuthTokens,
    /// The signed-in user.
    pub user: User,
    /// Whether the backend remembers this device.
    pub device_trusted: bool,
}

/// Authentication calls against the backend.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Requests a one-time code for `phone`.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    async fn send_otp(&self, phone: &str) -> Result<OtpChallenge, ApiError>;

    /// Exchanges a one-time code for credentials.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    async fn verify_otp(&self, phone: &str, code: &str) -> Result<VerifiedLogin, ApiError>;

    /// Exchanges a refresh token for new credentials.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, ApiError>;

    /// Fetches the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    async fn current_user(&self, access_token: &str) -> Result<User, ApiError>;

    /// Saves profile changes and returns the updated user.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    async fn update_profile(
        &self,
        access_token: &str,
        update: &ProfileUpdate,
    ) -> Result<User, ApiError>;

    /// Invalidates the session on the backend.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    async fn logout(&self, access_token: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Default, Deserialize)]
struct OtpSentData {
    #[serde(default, alias = "expiresIn")]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    #[serde(alias = "accessToken", alias = "token")]
    access_token: String,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(default, alias = "expiresIn")]
    expires_in: Option<i64>,
}

/// [`AuthApi`] over the shared request pipeline.
pub struct BackendAuthApi {
    pipeline: RequestPipeline,
    clock: Arc<dyn Clock>,
}

impl BackendAuthApi {
    /// Creates the API client.
    #[must_use]
    pub fn new(pipeline: RequestPipeline, clock: Arc<dyn Clock>) -> Self {
        Self { pipeline, clock }
    }

    async fn call(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let mut descriptor =
            RequestDescriptor::new(method, path).with_options(RequestOptions::anonymous());
        descriptor.body = body;
        let response = self.pipeline.send(&descriptor, bearer).await?;
        if response.success {
            return Ok(response);
        }
        let message = response
            .message
            .clone()
            .unwrap_or_else(|| ApiErrorKind::Client.default_message().to_string());
        let mut error = ApiError::new(ApiErrorKind::Client, message)
            .with_request_id(response.request_id);
        error.status_code = Some(response.status_code);
        Err(error)
    }

    fn tokens_from(&self, data: &Value) -> Result<AuthTokens, ApiError> {
        let source = data.get("tokens").unwrap_or(data);
        let raw: TokenData = parse(source, "tokens")?;
        let expires_at = raw
            .expires_in
            .map(|secs| self.clock.now() + TimeDelta::seconds(secs));
        Ok(AuthTokens {
            access_token: raw.access_token,
            refresh_token: raw.refresh_token,
            expires_at,
        })
    }

    fn user_from(data: &Value) -> Result<User, ApiError> {
        parse(data.get("user").unwrap_or(data), "user")
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: &Value, what: &str) -> Result<T, ApiError> {
    T::deserialize(value).map_err(|e| {
        ApiError::new(
            ApiErrorKind::Server,
            format!("Unexpected {what} in response: {e}"),
        )
    })
}

#[async_trait]
impl AuthApi for BackendAuthApi {
    async fn send_otp(&self, phone: &str) -> Result<OtpChallenge, ApiError> {
        let path = &self.pipeline.config().endpoints.send_otp;
        let response = self
            .call(HttpMethod::Post, path, Some(json!({ "phone": phone })), None)
            .await?;
        let data: OtpSentData = response.data_as().unwrap_or_default();
        Ok(OtpChallenge {
            phone: phone.to_string(),
            message: response.message,
            expires_in_secs: data.expires_in,
        })
    }

    async fn verify_otp(&self, phone: &str, code: &str) -> Result<VerifiedLogin, ApiError> {
        let path = &self.pipeline.config().endpoints.verify_otp;
        let response = self
            .call(
                HttpMethod::Post,
                path,
                Some(json!({ "phone": phone, "otp": code })),
                None,
            )
            .await?;
        let device_trusted = response
            .data
            .get("device_trusted")
            .or_else(|| response.data.get("deviceTrusted"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(VerifiedLogin {
            tokens: self.tokens_from(&response.data)?,
            user: Self::user_from(&response.data)?,
            device_trusted,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, ApiError> {
        let path = &self.pipeline.config().endpoints.refresh;
        let response = self
            .call(
                HttpMethod::Post,
                path,
                Some(json!({ "refreshToken": refresh_token })),
                None,
            )
            .await?;
        self.tokens_from(&response.data)
    }

    async fn current_user(&self, access_token: &str) -> Result<User, ApiError> {
        let path = &self.pipeline.config().endpoints.current_user;
        let response = self
            .call(HttpMethod::Get, path, None, Some(access_token))
            .await?;
        Self::user_from(&response.data)
    }

    async fn update_profile(
        &self,
        access_token: &str,
        update: &ProfileUpdate,
    ) -> Result<User, ApiError> {
        let path = &self.pipeline.config().endpoints.profile;
        let body = serde_json::to_value(update)
            .map_err(|e| ApiError::new(ApiErrorKind::Client, e.to_string()))?;
        let response = self
            .call(HttpMethod::Patch, path, Some(body), Some(access_token))
            .await?;
        Self::user_from(&response.data)
    }

    async fn logout(&self, access_token: &str) -> Result<(), ApiError> {
        let path = &self.pipeline.config().endpoints.logout;
        self.call(HttpMethod::Post, path, None, Some(access_token))
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for BackendAuthApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendAuthApi")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}
