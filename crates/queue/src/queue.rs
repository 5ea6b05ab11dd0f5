use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use verbatim_ratelimit::{estimate_tokens, Outcome, RateLimiter, RequestSpec};
use verbatim_types::Ms;

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};

fn now_ms() -> Ms {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

struct Turnstile {
    last_start: Option<Instant>,
}

/// Bounded-concurrency FIFO scheduler for LLM calls.
///
/// Callers submit jobs through [`RequestQueue::submit`]. Starts are admitted
/// in strict FIFO order (the order `submit` calls reach the internal
/// turnstile), but once a job is admitted it runs concurrently with up to
/// `max_concurrent - 1` others, so completion order is not guaranteed.
pub struct RequestQueue {
    limiter: Arc<RateLimiter>,
    config: QueueConfig,
    turnstile: AsyncMutex<Turnstile>,
    semaphore: Arc<Semaphore>,
    session_starts: StdMutex<HashMap<String, u64>>,
}

impl RequestQueue {
    pub fn new(limiter: Arc<RateLimiter>, config: QueueConfig) -> Self {
        Self {
            limiter,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent as usize)),
            config,
            turnstile: AsyncMutex::new(Turnstile { last_start: None }),
            session_starts: StdMutex::new(HashMap::new()),
        }
    }

    /// The rate limiter gating this queue, exposed so callers can run their
    /// own retry-with-backoff wrapper around a job's actual LLM call using
    /// the same shared limiter (see `verbatim_ratelimit::retry_with_backoff`).
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Number of times any session has been admitted to run. Exposed for
    /// fairness diagnostics; incremented on start, never on completion.
    pub fn session_start_count(&self, session_id: &str) -> u64 {
        self.session_starts
            .lock()
            .unwrap()
            .get(session_id)
            .copied()
            .unwrap_or(0)
    }

    /// Enqueue `job`, waiting for a FIFO turn, a free concurrency slot and
    /// the rate limiter's blessing before running it. `spec` describes the
    /// request for token-budget accounting; pass `RequestSpec::default()`-style
    /// values sized to the actual payload.
    pub async fn submit<F, Fut, T>(
        &self,
        session_id: Option<&str>,
        spec: RequestSpec,
        cancel: &CancellationToken,
        job: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let _estimate = estimate_tokens(&spec);
        let permit = self.admit(session_id, &spec, cancel).await?;

        if cancel.is_cancelled() {
            drop(permit);
            return Err(QueueError::Cancelled);
        }

        if let Some(session_id) = session_id {
            let mut starts = self.session_starts.lock().unwrap();
            *starts.entry(session_id.to_string()).or_insert(0) += 1;
        }

        trace!(?session_id, "queue job started");
        let task = tokio::spawn(async move {
            let result = job().await;
            drop(permit);
            result
        });

        tokio::select! {
            result = task => result.map_err(|_| QueueError::Cancelled),
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
        }
    }

    /// Runs the FIFO-ordering, rate-limit and concurrency gates, returning
    /// an owned semaphore permit once the caller may start. Held across the
    /// rate-limiter waits so admission order matches submission order.
    async fn admit(
        &self,
        session_id: Option<&str>,
        spec: &RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<tokio::sync::OwnedSemaphorePermit> {
        let mut turnstile = self.turnstile.lock().await;

        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        if let Some(last_start) = turnstile.last_start {
            let min_interval = Duration::from_millis(self.config.min_interval_ms as u64);
            let elapsed = last_start.elapsed();
            if elapsed < min_interval {
                tokio::select! {
                    _ = tokio::time::sleep(min_interval - elapsed) => {}
                    _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                }
            }
        }

        loop {
            let outcome = self.limiter.acquire(spec, session_id, now_ms())?;
            match outcome {
                Outcome::Proceed => break,
                Outcome::Skip => {
                    debug!(?session_id, "queue job skipped by rate limiter");
                    return Err(QueueError::Skipped);
                }
                Outcome::Wait(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                    }
                }
            }
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");

        turnstile.last_start = Some(Instant::now());
        Ok(permit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verbatim_ratelimit::RateLimitConfig;

    fn queue_with(max_concurrent: u8, rpm: u32) -> RequestQueue {
        let limiter = Arc::new(RateLimiter::new(
            RateLimitConfig {
                rpm,
                ..RateLimitConfig::default()
            },
            0,
        ));
        RequestQueue::new(
            limiter,
            QueueConfig {
                max_concurrent,
                min_interval_ms: 0,
            },
        )
    }

    #[tokio::test]
    async fn runs_a_job_and_returns_its_value() {
        let queue = queue_with(4, 4500);
        let cancel = CancellationToken::new();
        let spec = RequestSpec { message_chars: 10, max_tokens: 10 };
        let result = queue
            .submit(Some("s1"), spec, &cancel, || async { 42 })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(queue.session_start_count("s1"), 1);
    }

    #[tokio::test]
    async fn rejects_with_skipped_when_rate_limit_is_exhausted() {
        let limiter = Arc::new(RateLimiter::new(
            RateLimitConfig {
                rpm: 1,
                skip_threshold_ms: 10,
                ..RateLimitConfig::default()
            },
            0,
        ));
        let queue = RequestQueue::new(
            limiter,
            QueueConfig { max_concurrent: 4, min_interval_ms: 0 },
        );
        let cancel = CancellationToken::new();
        let spec = RequestSpec { message_chars: 4, max_tokens: 10 };

        queue
            .submit(Some("s1"), spec, &cancel, || async { 1 })
            .await
            .unwrap();
        let second = queue.submit(Some("s1"), spec, &cancel, || async { 2 }).await;
        assert!(matches!(second, Err(QueueError::Skipped)));
    }

    #[tokio::test]
    async fn cancellation_token_aborts_a_pending_submit() {
        let queue = queue_with(1, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let spec = RequestSpec { message_chars: 4, max_tokens: 10 };
        let result = queue.submit(Some("s1"), spec, &cancel, || async { 1 }).await;
        assert!(matches!(result, Err(QueueError::Cancelled)));
    }

    #[tokio::test]
    async fn bounded_concurrency_limits_simultaneous_jobs() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let queue = Arc::new(queue_with(2, 4500));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = queue.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            let cancel = CancellationToken::new();
            let spec = RequestSpec { message_chars: 4, max_tokens: 10 };
            handles.push(tokio::spawn(async move {
                queue
                    .submit(Some(&format!("s{i}")), spec, &cancel, move || async move {
                        let n = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(n, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
