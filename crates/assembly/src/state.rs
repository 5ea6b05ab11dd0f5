//! Mutable per-session state owned by [`crate::controller::SessionController`].
//!
//! Held behind a single `tokio::sync::Mutex`: the driver task and the
//! forced-commit sink (invoked from the recovery engine's spawned task) are
//! the only two callers, and neither holds the lock across an await.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use verbatim_partial::PartialTracker;
use verbatim_rtt::{RttConfig, RttTracker};
use verbatim_types::{Commit, CommitId, Ms};

#[derive(Debug, Clone)]
pub(crate) struct LastCommit {
    pub id: CommitId,
    pub text: String,
    pub forced: bool,
    pub committed_at: Ms,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingFinal {
    pub text: String,
    #[allow(dead_code)]
    pub at: Ms,
}

pub(crate) struct ThrottleState {
    pub last_sent_at: Option<Ms>,
    pub last_sent_len: usize,
    pub pending_text: Option<String>,
    pub deadline: Option<tokio::time::Instant>,
    pub last_job_cancel: Option<CancellationToken>,
}

impl Default for ThrottleState {
    fn default() -> Self {
        Self {
            last_sent_at: None,
            last_sent_len: 0,
            pending_text: None,
            deadline: None,
            last_job_cancel: None,
        }
    }
}

pub(crate) struct State {
    pub event_seq: u64,
    pub segment_id: CommitId,
    pub partial: PartialTracker,
    pub rtt: RttTracker,
    pub last_commit: Option<LastCommit>,
    pub last_original_commit_text: String,
    pub pending_final: Option<PendingFinal>,
    pub pending_final_deadline: Option<tokio::time::Instant>,
    pub throttle: ThrottleState,
    pub commits: Vec<Commit>,
}

impl State {
    pub fn new(rtt_cfg: RttConfig) -> Self {
        Self {
            event_seq: 0,
            segment_id: Uuid::new_v4(),
            partial: PartialTracker::new(),
            rtt: RttTracker::new(rtt_cfg),
            last_commit: None,
            last_original_commit_text: String::new(),
            pending_final: None,
            pending_final_deadline: None,
            throttle: ThrottleState::default(),
            commits: Vec::new(),
        }
    }

    pub fn next_seq(&mut self) -> u64 {
        let seq = self.event_seq;
        self.event_seq += 1;
        seq
    }
}

fn cleaned_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

pub(crate) fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Word-boundary-safe check that `candidate` begins with `prefix`, ignoring
/// case and punctuation (used for the pending-final "startsWith" rule and
/// the partial-never-drop-if-extends rule; both need to tolerate the
/// recognizer re-casing or re-punctuating a word it already emitted).
pub(crate) fn normalized_starts_with(candidate: &str, prefix: &str) -> bool {
    let candidate_words = cleaned_words(candidate);
    let prefix_words = cleaned_words(prefix);
    if prefix_words.is_empty() {
        return true;
    }
    if candidate_words.len() < prefix_words.len() {
        return false;
    }
    candidate_words[..prefix_words.len()] == prefix_words[..]
}

fn normalize_for_compare(text: &str) -> String {
    cleaned_words(text).join(" ")
}

fn word_overlap_ratio(a: &str, b: &str) -> f32 {
    let wa: HashSet<String> = cleaned_words(a).into_iter().collect();
    let wb: HashSet<String> = cleaned_words(b).into_iter().collect();
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let shared = wa.intersection(&wb).count();
    let denom = wa.len().max(wb.len());
    shared as f32 / denom as f32
}

/// Whether a forced commit arriving within the suppression window should be
/// dropped as a duplicate of the previous commit (spec section 4.8):
/// suppressed when the texts are equal once normalized, or when they are
/// close in length and share most of their words. Never suppressed when the
/// previous commit was unforced and this one materially extends it.
pub(crate) fn is_duplicate_forced_commit(new_text: &str, last_text: &str, last_forced: bool) -> bool {
    let norm_new = normalize_for_compare(new_text);
    let norm_last = normalize_for_compare(last_text);
    if norm_new == norm_last {
        return true;
    }

    let len_diff = (norm_new.len() as i64 - norm_last.len() as i64).abs();
    if len_diff > 10 {
        return false;
    }

    let materially_longer = norm_new.len() > norm_last.len() + 10;
    if materially_longer {
        return false;
    }

    if !last_forced && norm_new.len() > norm_last.len() {
        return false;
    }

    word_overlap_ratio(&norm_new, &norm_last) >= 0.75
}
