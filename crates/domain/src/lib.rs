//! Sparkle Domain - Core connection and session types
//!
//! This crate defines the data model shared by the client connection layer.
//! All types here are pure Rust with no I/O dependencies.

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod id;
pub mod request;
pub mod session;

pub use api::{ApiError, ApiErrorKind, ApiResponse};
pub use config::{ClientConfig, EndpointConfig, HealthConfig, QueueConfig, SessionConfig};
pub use connection::{
    ConnectionEvent, ConnectionEventRecord, ConnectionQuality, ConnectionStatus, HealthState,
};
pub use error::{DomainError, DomainResult};
pub use id::{generate_guest_id, generate_id, generate_request_id};
pub use request::{HttpMethod, QueuedRequest, RequestDescriptor, RequestOptions};
pub use session::{
    AuthSnapshot, AuthState, AuthTokens, ProfileUpdate, Session, StoredSession, User, UserRole,
    normalize_phone, validate_otp,
};
