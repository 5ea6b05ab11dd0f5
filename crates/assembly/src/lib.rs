//! Assembly Controller (spec C8): wires the overlap merger, deduplicator,
//! partial tracker, RTT tracker, rate limiter, request queue and
//! forced-commit/recovery engine into one per-session driver that turns
//! recognizer fragments into an ordered stream of output events.

mod clock;
mod config;
mod controller;
mod error;
mod llm;
mod state;

pub use config::{Configuration, ThrottleConfig};
pub use controller::{RecoveryDependencies, SessionController};
pub use error::{EngineError, Result};
pub use llm::{GrammarCorrector, NoopGrammarCorrector, NoopTranslator, Translator};

pub use verbatim_dedup::DedupConfig;
pub use verbatim_events::{EmittedEvent, Event, EventBus, EventBusRef, InMemoryEventBus, NullEventBus};
pub use verbatim_overlap::OverlapConfig;
pub use verbatim_queue::{QueueConfig, QueueError, RequestQueue};
pub use verbatim_ratelimit::{RateLimitConfig, RateLimiter};
pub use verbatim_recovery::{AudioRingBuffer, RecognizerFactory, RecognizerStream, RecoveryConfig};
pub use verbatim_rtt::RttConfig;
pub use verbatim_types::{Commit, CommitId, Fragment, FragmentKind, Ms};

pub use tokio_util::sync::CancellationToken;
