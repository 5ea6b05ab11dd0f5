//! Parses the single `"try again in <n>(ms|s|m)"` phrasing this engine
//! recognizes from a 429/rate-limit-shaped error, and applies the safety
//! buffer described in spec 4.5 before handing a delay back to the caller.
//!
//! Which exact phrasing each upstream provider emits is not authoritative
//! (spec section 9); this parses the one documented form and falls back to
//! the exponential-backoff formula for anything else.

use std::time::Duration;

/// Whether the original error text mentioned a token-per-minute limit, used
/// to decide whether the 500ms minimum-delay floor below applies.
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    let lower = message.to_lowercase();
    let marker = "try again in ";
    let idx = lower.find(marker)?;
    let rest = &lower[idx + marker.len()..];

    let digits_end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let number: f64 = rest[..digits_end].parse().ok()?;

    let unit_str = &rest[digits_end..];
    let millis = if unit_str.starts_with("ms") {
        number
    } else if unit_str.starts_with('s') {
        number * 1000.0
    } else if unit_str.starts_with('m') {
        number * 60_000.0
    } else {
        return None;
    };

    Some(Duration::from_millis(millis.max(0.0) as u64))
}

/// Apply the safety buffer: `x1.5 + 50ms` under 100ms, `x1.2 + 200ms`
/// otherwise, a 1s floor when the message mentions TPM and the raw delay
/// was under 500ms, all capped by `max_delay`.
pub fn apply_safety_buffer(raw: Duration, message: &str, max_delay: Duration) -> Duration {
    let raw_ms = raw.as_millis() as f64;
    let mut buffered_ms = if raw_ms < 100.0 {
        raw_ms * 1.5 + 50.0
    } else {
        raw_ms * 1.2 + 200.0
    };

    let mentions_tpm = message.to_lowercase().contains("tpm");
    if mentions_tpm && raw_ms < 500.0 {
        buffered_ms = buffered_ms.max(1000.0);
    }

    let capped = buffered_ms.min(max_delay.as_millis() as f64);
    Duration::from_millis(capped as u64)
}
