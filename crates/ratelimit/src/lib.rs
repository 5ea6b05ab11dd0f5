//! Rate limiting for outbound LLM calls: global + per-session sliding
//! windows, fair-share division among active sessions, token estimation,
//! and retry-after parsing with a safety buffer (spec section 4.5/6).

mod config;
mod error;
mod estimate;
mod limiter;
mod retry;
mod retry_after;

pub use config::{RateLimitConfig, ACTIVE_SESSION_MS, WINDOW_MS};
pub use error::{RateLimitError, Result};
pub use estimate::{estimate_tokens, RequestSpec, TokenEstimate};
pub use limiter::{daily_exhausted, Outcome, RateLimiter};
pub use retry::{retry_with_backoff, RetryableError};
pub use retry_after::{apply_safety_buffer, parse_retry_after};
