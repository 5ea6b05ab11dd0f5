//! Shared data model for the transcript assembly engine.
//!
//! These types carry no behavior beyond simple accessors; the components
//! that operate on them (overlap merging, deduplication, rate limiting, …)
//! live in their own crates. Keeping the model here lets every component
//! crate depend on the shapes without depending on each other.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Millisecond timestamp off a monotonic clock. The engine never interprets
/// this as wall-clock time; callers are expected to source it from
/// `Instant`-derived elapsed milliseconds or an equivalent monotonic source.
pub type Ms = i64;

/// An opaque, stable identifier for a [`Commit`].
pub type CommitId = Uuid;

/// The kind of transcript fragment delivered by the upstream recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Partial,
    Final,
}

/// A single piece of text delivered by the recognizer. Immutable once
/// constructed; `seq` is monotone per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    pub kind: FragmentKind,
    pub seq: u64,
    pub recv_at: Ms,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ts: Option<Ms>,
}

impl Fragment {
    pub fn new(text: impl Into<String>, kind: FragmentKind, seq: u64, recv_at: Ms) -> Self {
        Self {
            text: text.into(),
            kind,
            seq,
            recv_at,
            client_ts: None,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self.kind, FragmentKind::Partial)
    }

    pub fn is_final(&self) -> bool {
        matches!(self.kind, FragmentKind::Final)
    }
}

/// Point-in-time view of the partial tracker for one segment.
///
/// Invariant: `longest.len() >= latest.len()` does not hold in general (the
/// two are independent high-water marks over different predicates); what
/// does hold is that `longest` never shrinks within a segment's lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialSnapshot {
    pub latest: String,
    pub latest_at: Ms,
    pub longest: String,
    pub longest_at: Ms,
}

/// An emitted, immutable entry in the append-only commit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub text: String,
    pub forced: bool,
    pub committed_at: Ms,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_commit_id: Option<CommitId>,
}

/// At most one of these exists per session; holds a forced-final's text
/// while C7 attempts decoder-gap recovery.
#[derive(Debug, Clone)]
pub struct ForcedFinalBuffer {
    pub text: String,
    pub created_at: Ms,
    pub recovery_in_progress: bool,
    pub committed_by_recovery: bool,
}

impl ForcedFinalBuffer {
    pub fn new(text: impl Into<String>, created_at: Ms) -> Self {
        Self {
            text: text.into(),
            created_at,
            recovery_in_progress: false,
            committed_by_recovery: false,
        }
    }
}

/// Per-session (or global) usage accounting inside a sliding 60s window.
#[derive(Debug, Clone, Default)]
pub struct SessionUsage {
    pub requests_in_window: u32,
    pub tokens_in_window: u64,
    pub window_start: Ms,
    /// Last time this entry observed any activity; used for 5-minute idle GC.
    pub last_active: Ms,
}

impl SessionUsage {
    pub fn new(now: Ms) -> Self {
        Self {
            requests_in_window: 0,
            tokens_in_window: 0,
            window_start: now,
            last_active: now,
        }
    }
}
