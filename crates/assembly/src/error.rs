use thiserror::Error;

use verbatim_queue::QueueError;
use verbatim_ratelimit::{RateLimitError, RetryableError};
use verbatim_recovery::RecoveryError;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Composes every component-local error enum into one crate-boundary type,
/// following the taxonomy in spec section 7. The commit path itself never
/// raises one of these: a forced or ordinary commit is always committable,
/// and LLM-side failures below reduce to "keep the original text" rather
/// than propagating.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    /// An LLM adapter returned a response this engine could not interpret.
    #[error("malformed response from an LLM backend")]
    MalformedResponse,

    /// An LLM backend reported a 429/rate-limit-shaped error directly (as
    /// opposed to this engine's own pre-flight limiter rejecting the call).
    /// Retried by [`verbatim_ratelimit::retry_with_backoff`] up to
    /// `rate_limit.max_retries` times before falling back to the original
    /// text, per spec section 4.5/7.
    #[error("upstream backend reported a rate limit: {0}")]
    UpstreamRateLimited(String),

    /// A translation came back empty or identical to its source text.
    #[error("translation was empty or echoed its source text")]
    EmptyOrEchoedTranslation,

    /// A forced commit within the dedup window matched a prior commit and
    /// was dropped; surfaced only as a metric, never to the caller.
    #[error("duplicate forced commit suppressed")]
    DuplicateCommitDetected,

    /// The owning session was cancelled; the task should exit cleanly.
    #[error("session task cancelled")]
    Cancelled,
}

impl RetryableError for EngineError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, EngineError::UpstreamRateLimited(_))
    }

    fn message(&self) -> Option<&str> {
        match self {
            EngineError::UpstreamRateLimited(msg) => Some(msg),
            _ => None,
        }
    }
}
