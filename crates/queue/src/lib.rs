//! Bounded-concurrency FIFO scheduler for LLM calls, gated by the shared
//! rate limiter (spec section 4.6). Preserves FIFO order of job *starts*;
//! completion order is not guaranteed once jobs are running concurrently.

mod config;
mod error;
mod queue;

pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use queue::RequestQueue;

pub use tokio_util::sync::CancellationToken;
