//! Sparkle Infrastructure - Adapters and composition
//!
//! This crate provides concrete implementations of the ports defined in the
//! application layer, and [`ClientStack`], which wires them together.

pub mod adapters;
pub mod persistence;
pub mod stack;

pub use adapters::{AssumeConnected, ReqwestHealthProbe, ReqwestTransport, TcpReachability};
pub use persistence::{FileKeyValueStorage, InMemoryStorage};
pub use stack::{ClientStack, StackError};
