//! Sparkle Application - Connection and session services
//!
//! This crate holds the stateful services of the client connection layer:
//! the connection monitor, the API client with its retry queue, and the auth
//! session manager. All I/O goes through the traits in [`ports`].

pub mod auth;
pub mod connection;
pub mod device_identity;
pub mod http;
pub mod observer;
pub mod ports;
pub mod single_flight;

#[cfg(test)]
mod test_support;

pub use auth::{AuthError, AuthSessionManager, TokenStore, ValidationOutcome};
pub use connection::{ConnectionChange, ConnectionMonitor};
pub use device_identity::StoredDeviceIdentity;
pub use http::{ApiClient, DrainReport, RequestPipeline, SessionProvider};
pub use observer::{Listeners, Subscription};
pub use single_flight::SingleFlight;
