//! Network adapters.

mod health_probe;
mod reachability;
mod reqwest_transport;

pub use health_probe::ReqwestHealthProbe;
pub use reachability::{AssumeConnected, TcpReachability};
pub use reqwest_transport::ReqwestTransport;
