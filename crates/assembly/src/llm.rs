//! Opaque text-to-text collaborators dispatched through C6 (spec section 6):
//! grammar correction and translation. Both are out-of-scope external
//! systems; this crate defines only the narrow trait surface the controller
//! needs to submit work through the rate-limited request queue and fall
//! back to the original text on failure or timeout.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Partial-stage grammar correction timeout; final-stage triples it.
/// "Reasoning" backends get a further 5x budget per spec section 5.
pub(crate) fn grammar_timeout(is_partial: bool, slow_backend: bool) -> Duration {
    match (is_partial, slow_backend) {
        (true, false) => Duration::from_secs(2),
        (true, true) => Duration::from_secs(10),
        (false, false) => Duration::from_secs(5),
        (false, true) => Duration::from_secs(15),
    }
}

pub(crate) fn translation_timeout(is_partial: bool) -> Duration {
    if is_partial {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(20)
    }
}

/// A chat-style grammar corrector. Implementations may be "reasoning"
/// backends with materially higher latency; `is_slow_backend` lets the
/// controller pick the wider timeout budget for those.
#[async_trait]
pub trait GrammarCorrector: Send + Sync {
    async fn correct(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, EngineError>;

    fn is_slow_backend(&self) -> bool {
        false
    }
}

/// A chat-style translator targeting a single language per call.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        lang: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, EngineError>;
}

/// Pass-through corrector: returns the input unchanged. Used when an
/// embedding application has no grammar backend wired up.
#[derive(Debug, Default)]
pub struct NoopGrammarCorrector;

#[async_trait]
impl GrammarCorrector for NoopGrammarCorrector {
    async fn correct(
        &self,
        text: &str,
        _cancel: &CancellationToken,
    ) -> std::result::Result<String, EngineError> {
        Ok(text.to_string())
    }
}

/// Pass-through translator: returns the input unchanged. Useful in tests; a
/// real translator would have its echoed result rejected by the controller
/// and fall back to the original text just the same.
#[derive(Debug, Default)]
pub struct NoopTranslator;

#[async_trait]
impl Translator for NoopTranslator {
    async fn translate(
        &self,
        text: &str,
        _lang: &str,
        _cancel: &CancellationToken,
    ) -> std::result::Result<String, EngineError> {
        Ok(text.to_string())
    }
}
