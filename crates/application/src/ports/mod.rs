//! Port definitions (interfaces)
//!
//! Ports define the boundaries between the connection layer and the outside
//! world. Each port is a trait implemented by adapters in the infrastructure
//! layer, or by fakes in tests.

mod clock;
mod device;
mod probe;
mod storage;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use device::DeviceIdentity;
pub use probe::{HealthProbe, NetworkReachability, ProbeError};
pub use storage::{KeyValueStorage, StorageError};
pub use transport::{Transport, TransportError, TransportRequest, TransportResponse};
