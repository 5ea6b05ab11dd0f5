//! Forced-final / decoder-gap recovery state machine (spec C7).
//!
//! A "forced-final" is a final that may have clipped trailing words. Rather
//! than commit it immediately, the engine buffers it, spins up a transient
//! recognizer over the last few seconds of PCM to recover the missing tail,
//! and merges the recovery against the buffer before committing. The
//! buffered text is never lost: every exit path, including recognizer
//! failure and hard timeout, ends in a commit.

mod config;
mod engine;
mod error;
mod traits;

pub use config::RecoveryConfig;
pub use engine::{ForcedCommitEngine, NewFinalOutcome, RecoveryState};
pub use error::{RecoveryError, Result};
pub use traits::{AudioRingBuffer, ForcedCommitSink, RecognizerFactory, RecognizerStream};
