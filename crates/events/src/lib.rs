//! Typed output events for the transcript assembly engine.
//!
//! This crate defines the tagged sum type that replaces the heterogeneous,
//! dynamically-shaped event payloads a callback-table design would produce,
//! plus the `EventBus` trait used to emit them without coupling the engine
//! to any particular transport.

mod bus;

pub use bus::{EmittedEvent, EventBus, EventBusRef, InMemoryEventBus, NullEventBus};

use serde::{Deserialize, Serialize};
use verbatim_types::{CommitId, Ms};

/// Output events emitted by the Assembly Controller, id-stable per variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Partial {
        text: String,
        seq: u64,
        offset: u32,
        at: Ms,
    },
    Final {
        text: String,
        seq: u64,
        offset: u32,
        at: Ms,
    },
    Commit {
        id: CommitId,
        text: String,
        forced: bool,
        at: Ms,
    },
    GrammarUpdate {
        commit_id: CommitId,
        original: String,
        corrected: String,
        at: Ms,
    },
    Translation {
        commit_id: CommitId,
        lang: String,
        text: String,
        is_partial: bool,
        at: Ms,
    },
    LatencyReport {
        value_ms: u64,
        at: Ms,
    },
}

impl Event {
    /// Topic name used when emitting through an [`EventBus`].
    pub fn topic(&self) -> &'static str {
        match self {
            Event::Partial { .. } => event_names::PARTIAL,
            Event::Final { .. } => event_names::FINAL,
            Event::Commit { .. } => event_names::COMMIT,
            Event::GrammarUpdate { .. } => event_names::GRAMMAR_UPDATE,
            Event::Translation { .. } => event_names::TRANSLATION,
            Event::LatencyReport { .. } => event_names::LATENCY_REPORT,
        }
    }
}

/// Event topic names as constants to prevent typos at call sites.
pub mod event_names {
    pub const PARTIAL: &str = "transcript:partial";
    pub const FINAL: &str = "transcript:final";
    pub const COMMIT: &str = "transcript:commit";
    pub const GRAMMAR_UPDATE: &str = "transcript:grammar_update";
    pub const TRANSLATION: &str = "transcript:translation";
    pub const LATENCY_REPORT: &str = "transcript:latency_report";
}
