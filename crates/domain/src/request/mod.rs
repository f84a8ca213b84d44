//! Outbound request types

mod descriptor;
mod method;

pub use descriptor::{QueuedRequest, RequestDescriptor, RequestOptions};
pub use method::HttpMethod;
