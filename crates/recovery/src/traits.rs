use async_trait::async_trait;

use crate::error::RecoveryError;

/// A transient recognizer stream acquired for the duration of one recovery
/// attempt. Implementations wrap whatever decoder the engine is embedded in.
#[async_trait]
pub trait RecognizerStream: Send {
    /// Feed a chunk of PCM samples to the decoder.
    async fn feed(&mut self, samples: &[f32]) -> Result<(), RecoveryError>;

    /// Whether the decoder has processed everything fed so far and is ready
    /// to be read from without blocking further. Polled, not awaited, since
    /// some backends expose readiness only through a non-blocking check.
    fn is_ready(&self) -> bool;

    /// Half-close the write side, await the decoder's `end` signal, and
    /// return its final transcript (or the last partial if no final was
    /// ever emitted before `end`).
    async fn finish(self: Box<Self>) -> Result<String, RecoveryError>;
}

/// Produces a fresh, independent recognizer for a single recovery attempt.
#[async_trait]
pub trait RecognizerFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn RecognizerStream>, RecoveryError>;
}

/// Read-only snapshot access to the session's rolling audio buffer.
pub trait AudioRingBuffer: Send + Sync {
    /// The last `window_ms` of PCM samples, oldest first.
    fn last_window(&self, window_ms: u32) -> Vec<f32>;
}

/// Collaborator that performs the actual commit once recovery has produced
/// (or failed to produce) a merged transcript. Kept separate from this
/// crate's state machine so the Deduplicator-against-self exemption and the
/// rest of the commit procedure stay owned by the assembly controller.
#[async_trait]
pub trait ForcedCommitSink: Send + Sync {
    async fn commit_forced(&self, text: String);
}
