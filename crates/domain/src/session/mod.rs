//! Session and user types

mod phone;
mod types;

pub use phone::{normalize_phone, validate_otp};
pub use types::{
    AuthSnapshot, AuthState, AuthTokens, ProfileUpdate, Session, StoredSession, User, UserRole,
};
