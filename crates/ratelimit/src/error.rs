use thiserror::Error;

pub type Result<T> = std::result::Result<T, RateLimitError>;

#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The daily cap (disabled by default) has been tripped; terminal for
    /// the calling job, no retry.
    #[error("rate limit exhausted after {retries} retries")]
    RateLimitExhausted { retries: u8 },
}
