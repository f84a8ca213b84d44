//! Connectivity tracking.

mod monitor;

pub use monitor::{ConnectionChange, ConnectionMonitor, HISTORY_KEY, STATUS_KEY};
