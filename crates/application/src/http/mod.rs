//! Request execution: decoration, normalization, refresh and queueing.

mod client;
mod pipeline;
mod retry_queue;
mod session;

pub use client::{ApiClient, DrainReport};
pub use pipeline::RequestPipeline;
pub use retry_queue::RetryQueue;
pub use session::{NoSession, SessionProvider};
