use thiserror::Error;
use verbatim_ratelimit::RateLimitError;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The rate limiter projected a wait longer than its skip threshold;
    /// the job was never started.
    #[error("job skipped: projected rate-limit wait exceeded the skip threshold")]
    Skipped,

    /// The job was cancelled before it could start or while it was running.
    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}
