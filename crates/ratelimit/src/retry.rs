//! The generic retry wrapper named in spec 4.5: up to `max_retries`
//! additional attempts with exponential backoff when the failing call
//! didn't come with a server-supplied delay, stopping immediately on any
//! error that isn't rate-limit-shaped. `on_retry` is invoked once per
//! attempt that is about to be retried, before the sleep.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::RateLimitConfig;
use crate::limiter::RateLimiter;

/// What a failed operation tells the retry wrapper about itself.
pub trait RetryableError {
    /// Whether this failure looks like a 429/rate-limit-shaped error worth
    /// retrying. Any other error stops the loop and is returned as-is.
    fn is_rate_limited(&self) -> bool;

    /// The raw error text, if the caller wants [`RateLimiter::observe_response`]
    /// to try parsing a server-supplied delay out of it.
    fn message(&self) -> Option<&str> {
        None
    }
}

/// Calls `op` until it succeeds, a non-rate-limited error is returned, or
/// `cfg.max_retries` retries have been exhausted (whichever comes first).
///
/// On a rate-limited error, the delay before the next attempt prefers a
/// server-supplied value (parsed from the error's `message()` via
/// `limiter.observe_response`); otherwise it falls back to
/// `min(base_delay_ms * 2^attempt + jitter, max_delay_ms)`.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    limiter: &RateLimiter,
    cfg: &RateLimitConfig,
    mut op: F,
    mut on_retry: R,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: RetryableError,
    R: FnMut(u8, Duration),
{
    let mut attempt: u8 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_rate_limited() || attempt >= cfg.max_retries {
                    return Err(err);
                }
                let delay = err
                    .message()
                    .and_then(|m| limiter.observe_response(m))
                    .unwrap_or_else(|| exponential_backoff(cfg, attempt));
                on_retry(attempt, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn exponential_backoff(cfg: &RateLimitConfig, attempt: u8) -> Duration {
    let base = cfg.base_delay_ms as f64;
    let exp = base * 2f64.powi(attempt as i32);
    let jittered = exp + jitter_ms(cfg.base_delay_ms) as f64;
    let capped = jittered.min(cfg.max_delay_ms as f64).max(0.0);
    Duration::from_millis(capped as u64)
}

/// A small, allocation-free jitter term bounded by `base_delay_ms`, seeded
/// off the wall clock rather than pulling in a dedicated RNG crate for one
/// call site.
fn jitter_ms(base_delay_ms: u32) -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    nanos % base_delay_ms.max(1)
}
