//! Tracks the latest and longest partial transcript seen within the
//! current segment, plus a write-only mirror used to resolve late grammar
//! completions against the newest input regardless of commit boundaries.
//!
//! The Assembly Controller owns exactly one of these per session and drives
//! it from its single driver task, so there is no interior mutability here:
//! `update`/`snapshot_and_reset` being "atomic" just means callers never
//! observe a half-applied update, which falls out of `&mut self` access on
//! a single-threaded driver.

use verbatim_types::{Ms, PartialSnapshot};

/// Which field of the tracker an [`Extension`] was resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionSource {
    Latest,
    Longest,
}

/// The result of [`PartialTracker::extends`]: the tracked text begins with
/// the queried prefix, and `suffix` holds the missing words.
#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    pub source: ExtensionSource,
    pub full_text: String,
    pub suffix: String,
}

/// Whether `update` moved `latest` and/or `longest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    pub latest_changed: bool,
    pub longest_changed: bool,
}

#[derive(Debug, Default)]
pub struct PartialTracker {
    latest: String,
    latest_at: Ms,
    longest: String,
    longest_at: Ms,
    /// Never cleared by `snapshot_and_reset`; only ever overwritten forward.
    latest_for_correction: String,
}

impl PartialTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly arrived partial. `latest` moves whenever `text` is
    /// strictly longer than the current `latest`; `longest` is monotone in
    /// length across the whole segment. `latest_for_correction` always
    /// tracks the newest text, independent of either.
    pub fn update(&mut self, text: &str, now: Ms) -> UpdateOutcome {
        self.latest_for_correction = text.to_string();

        let mut outcome = UpdateOutcome::default();
        if text.len() > self.latest.len() {
            self.latest = text.to_string();
            self.latest_at = now;
            outcome.latest_changed = true;
        }
        if text.len() > self.longest.len() {
            self.longest = text.to_string();
            self.longest_at = now;
            outcome.longest_changed = true;
        }
        outcome
    }

    /// A copy of the current segment's state.
    pub fn snapshot(&self) -> PartialSnapshot {
        PartialSnapshot {
            latest: self.latest.clone(),
            latest_at: self.latest_at,
            longest: self.longest.clone(),
            longest_at: self.longest_at,
        }
    }

    /// Snapshot the current segment, then reset `latest`/`longest` for the
    /// next one. `latest_for_correction` is left untouched.
    pub fn snapshot_and_reset(&mut self) -> PartialSnapshot {
        let snapshot = self.snapshot();
        self.latest.clear();
        self.latest_at = 0;
        self.longest.clear();
        self.longest_at = 0;
        snapshot
    }

    /// The newest text seen, regardless of segment/commit boundaries.
    pub fn latest_for_correction(&self) -> &str {
        &self.latest_for_correction
    }

    /// Whether `longest`/`latest` begins with `text` (case-insensitive,
    /// whitespace-normalized), within `max_age` ms of `now`. `longest` is
    /// preferred over `latest` when both qualify, since it is the more
    /// complete candidate.
    pub fn extends(&self, text: &str, now: Ms, max_age: Ms) -> Option<Extension> {
        let query = normalize(text);
        if query.is_empty() {
            return None;
        }

        if now - self.longest_at <= max_age {
            if let Some(suffix) = suffix_after_prefix(&self.longest, &query) {
                return Some(Extension {
                    source: ExtensionSource::Longest,
                    full_text: self.longest.clone(),
                    suffix,
                });
            }
        }
        if now - self.latest_at <= max_age {
            if let Some(suffix) = suffix_after_prefix(&self.latest, &query) {
                return Some(Extension {
                    source: ExtensionSource::Latest,
                    full_text: self.latest.clone(),
                    suffix,
                });
            }
        }
        None
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// If `candidate` (normalized) begins with `query` (already normalized),
/// return the trimmed remainder in `candidate`'s original casing.
fn suffix_after_prefix(candidate: &str, query: &str) -> Option<String> {
    if candidate.is_empty() {
        return None;
    }
    let norm_candidate = normalize(candidate);
    if !norm_candidate.starts_with(query) {
        return None;
    }
    let words: Vec<&str> = candidate.split_whitespace().collect();
    let query_word_count = query.split_whitespace().count();
    if query_word_count >= words.len() {
        return Some(String::new());
    }
    Some(words[query_word_count..].join(" "))
}
