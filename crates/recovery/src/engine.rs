use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace, warn};

use verbatim_overlap::{merge_with_lookahead, words_are_related, MergeDecision, OverlapConfig};
use verbatim_types::{ForcedFinalBuffer, Ms};

use crate::config::RecoveryConfig;
use crate::error::{RecoveryError, Result};
use crate::traits::{AudioRingBuffer, ForcedCommitSink, RecognizerFactory};

/// Where a session's forced-commit/recovery state machine currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Idle,
    Buffered,
    Recovering,
}

struct Inner {
    state: RecoveryState,
    buffer: Option<ForcedFinalBuffer>,
    lookahead_partial: Option<String>,
    lookahead_final: Option<String>,
}

/// What happened when a new final arrived while a forced-final was
/// buffered or under recovery.
#[derive(Debug, Clone)]
pub enum NewFinalOutcome {
    /// No forced-final was buffered; the caller should process `text` as an
    /// ordinary new segment.
    NoBuffer,
    /// The new final overlapped the buffered text; the buffer was updated
    /// in place and recovery continues undisturbed. The caller must not
    /// process `text` any further, it has been absorbed.
    Merged,
    /// The new final was unrelated (or the merge attempt failed); the
    /// buffered text has already been committed as a forced final, and the
    /// caller must process `text` as an ordinary new segment.
    Interrupted { committed_text: String },
}

/// Per-session forced-commit/recovery state machine (spec C7).
///
/// `IDLE -> BUFFERED -> RECOVERING -> IDLE`. Guarded by a single async
/// mutex: the driver task and the spawned recovery task both touch this
/// state, and neither ever holds the lock across an await on the recognizer
/// or the commit sink.
pub struct ForcedCommitEngine {
    config: RecoveryConfig,
    overlap_cfg: OverlapConfig,
    inner: Mutex<Inner>,
    factory: Arc<dyn RecognizerFactory>,
    audio: Arc<dyn AudioRingBuffer>,
    sink: Arc<dyn ForcedCommitSink>,
}

impl ForcedCommitEngine {
    pub fn new(
        config: RecoveryConfig,
        factory: Arc<dyn RecognizerFactory>,
        audio: Arc<dyn AudioRingBuffer>,
        sink: Arc<dyn ForcedCommitSink>,
    ) -> Self {
        Self {
            config,
            overlap_cfg: OverlapConfig::default(),
            inner: Mutex::new(Inner {
                state: RecoveryState::Idle,
                buffer: None,
                lookahead_partial: None,
                lookahead_final: None,
            }),
            factory,
            audio,
            sink,
        }
    }

    pub async fn state(&self) -> RecoveryState {
        self.inner.lock().await.state
    }

    /// Open a forced-final buffer. Only legal from IDLE.
    pub async fn open_buffer(&self, text: impl Into<String>, now: Ms) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != RecoveryState::Idle {
            return Err(RecoveryError::NotIdle);
        }
        inner.buffer = Some(ForcedFinalBuffer::new(text, now));
        inner.state = RecoveryState::Buffered;
        inner.lookahead_partial = None;
        inner.lookahead_final = None;
        Ok(())
    }

    /// Begin recovery for the currently buffered text. Spawns the recovery
    /// task and returns a receiver that resolves once the (possibly merged,
    /// possibly raw-fallback) text has been committed. Only legal from
    /// BUFFERED.
    pub async fn begin_recovery(self: &Arc<Self>, now: Ms) -> Result<oneshot::Receiver<String>> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != RecoveryState::Buffered {
                return Err(RecoveryError::NotBuffered);
            }
            inner.state = RecoveryState::Recovering;
            if let Some(buffer) = inner.buffer.as_mut() {
                buffer.recovery_in_progress = true;
            }
        }

        let (tx, rx) = oneshot::channel();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let committed = engine.run_recovery(now).await;
            let _ = tx.send(committed);
        });
        Ok(rx)
    }

    /// Drive one recovery attempt to completion (or timeout), commit the
    /// result, and return to IDLE. Never leaves the buffered text
    /// uncommitted: every exit path below ends in a commit.
    async fn run_recovery(&self, now: Ms) -> String {
        let timeout = Duration::from_millis(self.config.recovery_timeout_ms as u64);
        match tokio::time::timeout(timeout, self.attempt_recovery(now)).await {
            Ok(text) => text,
            Err(_) => {
                warn!("recovery attempt timed out; committing buffered text raw");
                self.finalize(None).await
            }
        }
    }

    async fn attempt_recovery(&self, _now: Ms) -> String {
        let mut recognizer = match self.factory.create().await {
            Ok(r) => r,
            Err(err) => {
                warn!(%err, "recovery recognizer unavailable; falling back to buffered text");
                return self.finalize(None).await;
            }
        };

        let samples = self.audio.last_window(self.config.capture_window_ms);
        if let Err(err) = recognizer.feed(&samples).await {
            warn!(%err, "failed to feed recovery recognizer; falling back to buffered text");
            return self.finalize(None).await;
        }

        if !self.poll_ready(recognizer.as_ref()).await {
            warn!("recovery stream never became ready; falling back to buffered text");
            return self.finalize(None).await;
        }
        tokio::time::sleep(Duration::from_millis(self.config.stream_ready_settle_ms as u64)).await;

        let recovered = match recognizer.finish().await {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "recovery recognizer finish failed; falling back to buffered text");
                return self.finalize(None).await;
            }
        };

        self.finalize(Some(recovered)).await
    }

    async fn poll_ready(&self, recognizer: &dyn crate::traits::RecognizerStream) -> bool {
        let tick = Duration::from_millis(self.config.stream_ready_poll_ms as u64);
        let cap = Duration::from_millis(self.config.stream_ready_max_ms as u64);
        let mut waited = Duration::ZERO;
        while !recognizer.is_ready() {
            if waited >= cap {
                return false;
            }
            tokio::time::sleep(tick).await;
            waited += tick;
        }
        true
    }

    /// Merge `recovered` (if any) with the buffered text using whatever
    /// look-ahead has arrived since recovery began, commit the result, clear
    /// the buffer and return to IDLE.
    async fn finalize(&self, recovered: Option<String>) -> String {
        let (buffered_text, lookahead_partial, lookahead_final, stale) = {
            let inner = self.inner.lock().await;
            let text = inner
                .buffer
                .as_ref()
                .map(|b| b.text.clone())
                .unwrap_or_default();
            let stale = inner.state != RecoveryState::Recovering;
            (text, inner.lookahead_partial.clone(), inner.lookahead_final.clone(), stale)
        };

        // An interrupting new final (see `arrive_new_final`) may have already
        // committed the buffer and returned the engine to IDLE while this
        // recovery attempt was still in flight. Committing again here would
        // duplicate that commit.
        if stale {
            trace!("recovery finalize skipped; buffer was already resolved by an interrupting final");
            return buffered_text;
        }

        // An extending partial that arrived during recovery already covers
        // the decoder gap in full; it supersedes the bare recognizer result
        // rather than merely trimming it.
        let superseding_partial = lookahead_partial
            .as_deref()
            .filter(|p| p.len() > buffered_text.len() && p.starts_with(buffered_text.as_str()));

        let committed = if let Some(superseding) = superseding_partial {
            superseding.to_string()
        } else {
            let mut lookaheads: Vec<&str> = Vec::new();
            if let Some(p) = lookahead_partial.as_deref() {
                lookaheads.push(p);
            }
            if let Some(f) = lookahead_final.as_deref() {
                lookaheads.push(f);
            }

            match recovered.as_deref() {
                Some(recovered) if !recovered.trim().is_empty() && !is_unrelated(&buffered_text, recovered) => {
                    let result = merge_with_lookahead(&buffered_text, recovered, &lookaheads, &self.overlap_cfg);
                    match result.decision {
                        MergeDecision::Reject => buffered_text.clone(),
                        _ => result.text,
                    }
                }
                _ => buffered_text.clone(),
            }
        };

        {
            let mut inner = self.inner.lock().await;
            if let Some(buffer) = inner.buffer.as_mut() {
                buffer.committed_by_recovery = true;
            }
            inner.buffer = None;
            inner.lookahead_partial = None;
            inner.lookahead_final = None;
            inner.state = RecoveryState::Idle;
        }

        debug!(len = committed.len(), "forced-final recovery committed");
        self.sink.commit_forced(committed.clone()).await;
        committed
    }

    /// A new final arrived while a forced-final was buffered or under
    /// recovery. Returns whether it was folded into the buffer or forced an
    /// immediate interrupt-commit of the buffer.
    pub async fn arrive_new_final(&self, text: &str) -> NewFinalOutcome {
        let mut inner = self.inner.lock().await;
        let Some(buffer) = inner.buffer.clone() else {
            return NewFinalOutcome::NoBuffer;
        };

        if is_unrelated(&buffer.text, text) {
            inner.buffer = None;
            inner.state = RecoveryState::Idle;
            inner.lookahead_partial = None;
            inner.lookahead_final = None;
            drop(inner);
            self.sink.commit_forced(buffer.text.clone()).await;
            return NewFinalOutcome::Interrupted {
                committed_text: buffer.text,
            };
        }

        let result = merge_with_lookahead(&buffer.text, text, &[], &self.overlap_cfg);
        if result.decision == MergeDecision::Reject {
            inner.buffer = None;
            inner.state = RecoveryState::Idle;
            drop(inner);
            self.sink.commit_forced(buffer.text.clone()).await;
            return NewFinalOutcome::Interrupted {
                committed_text: buffer.text,
            };
        }

        if let Some(b) = inner.buffer.as_mut() {
            b.text = result.text;
        }
        inner.lookahead_final = Some(text.to_string());
        trace!("new final folded into forced-final buffer");
        NewFinalOutcome::Merged
    }

    /// A partial arrived while a forced-final was buffered or under
    /// recovery. If it strictly extends the buffered text it is recorded as
    /// look-ahead for the eventual recovery merge; returns whether it was used.
    pub async fn arrive_extending_partial(&self, text: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let extends = inner
            .buffer
            .as_ref()
            .map(|b| text.len() > b.text.len() && text.starts_with(b.text.as_str()))
            .unwrap_or(false);
        if extends {
            inner.lookahead_partial = Some(text.to_string());
        }
        extends
    }
}

/// Two texts share no related word of any meaningful length: the closest
/// thing this engine has to "no word overlap, no phrase overlap".
/// Short function words that two genuinely distinct segments can share by
/// chance. A shared word here doesn't count toward relatedness, only a
/// shared content word does.
const STOPWORDS: &[&str] = &[
    "the", "and", "that", "this", "with", "from", "than", "rather", "have", "will", "what",
    "your", "into", "were", "been", "just", "also", "they", "them", "their", "there", "here",
];

fn is_content_word(w: &str) -> bool {
    w.len() >= 3 && !STOPWORDS.contains(&w.to_lowercase().as_str())
}

fn is_unrelated(a: &str, b: &str) -> bool {
    let words_a: Vec<&str> = a.split_whitespace().filter(|w| is_content_word(w)).collect();
    let words_b: Vec<&str> = b.split_whitespace().filter(|w| is_content_word(w)).collect();
    if words_a.is_empty() || words_b.is_empty() {
        return true;
    }
    !words_a
        .iter()
        .any(|wa| words_b.iter().any(|wb| words_are_related(wa, wb)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::RecognizerStream;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeStream {
        text: String,
        ready: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RecognizerStream for FakeStream {
        async fn feed(&mut self, _samples: &[f32]) -> Result<()> {
            self.ready.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
        async fn finish(self: Box<Self>) -> Result<String> {
            Ok(self.text.clone())
        }
    }

    struct FakeFactory {
        text: String,
    }

    #[async_trait]
    impl RecognizerFactory for FakeFactory {
        async fn create(&self) -> Result<Box<dyn RecognizerStream>> {
            Ok(Box::new(FakeStream {
                text: self.text.clone(),
                ready: Arc::new(AtomicBool::new(false)),
            }))
        }
    }

    struct FailingFactory;

    #[async_trait]
    impl RecognizerFactory for FailingFactory {
        async fn create(&self) -> Result<Box<dyn RecognizerStream>> {
            Err(RecoveryError::RecognizerUnavailable("no device".into()))
        }
    }

    struct NullAudio;
    impl AudioRingBuffer for NullAudio {
        fn last_window(&self, _window_ms: u32) -> Vec<f32> {
            Vec::new()
        }
    }

    struct CapturingSink {
        commits: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl ForcedCommitSink for CapturingSink {
        async fn commit_forced(&self, text: String) {
            self.commits.lock().unwrap().push(text);
        }
    }

    fn engine(factory: Arc<dyn RecognizerFactory>, commits: Arc<StdMutex<Vec<String>>>) -> Arc<ForcedCommitEngine> {
        Arc::new(ForcedCommitEngine::new(
            RecoveryConfig {
                stream_ready_max_ms: 200,
                stream_ready_poll_ms: 5,
                stream_ready_settle_ms: 5,
                recovery_timeout_ms: 2000,
                ..RecoveryConfig::default()
            },
            factory,
            Arc::new(NullAudio),
            Arc::new(CapturingSink { commits }),
        ))
    }

    #[tokio::test]
    async fn open_buffer_requires_idle() {
        let commits = Arc::new(StdMutex::new(Vec::new()));
        let engine = engine(Arc::new(FailingFactory), commits);
        engine.open_buffer("hello there", 0).await.unwrap();
        assert_eq!(engine.state().await, RecoveryState::Buffered);
        let err = engine.open_buffer("again", 0).await.unwrap_err();
        assert!(matches!(err, RecoveryError::NotIdle));
    }

    #[tokio::test]
    async fn successful_recovery_merges_and_commits() {
        let commits = Arc::new(StdMutex::new(Vec::new()));
        let factory = Arc::new(FakeFactory {
            text: "off from others".to_string(),
        });
        let engine = engine(factory, commits.clone());
        engine.open_buffer("desires to be cordoned off", 0).await.unwrap();
        let rx = engine.begin_recovery(0).await.unwrap();
        let committed = rx.await.unwrap();

        assert_eq!(engine.state().await, RecoveryState::Idle);
        assert_eq!(commits.lock().unwrap().as_slice(), [committed.clone()]);
        assert!(committed.contains("cordoned"));
        assert!(committed.contains("others"));
    }

    #[tokio::test]
    async fn recognizer_unavailable_falls_back_to_buffered_text() {
        let commits = Arc::new(StdMutex::new(Vec::new()));
        let engine = engine(Arc::new(FailingFactory), commits.clone());
        engine.open_buffer("our own self centered desires", 0).await.unwrap();
        let rx = engine.begin_recovery(0).await.unwrap();
        let committed = rx.await.unwrap();

        assert_eq!(committed, "our own self centered desires");
        assert_eq!(engine.state().await, RecoveryState::Idle);
        assert_eq!(commits.lock().unwrap().as_slice(), [committed]);
    }

    #[tokio::test]
    async fn unrelated_new_final_interrupts_and_commits_buffer() {
        let commits = Arc::new(StdMutex::new(Vec::new()));
        let engine = engine(Arc::new(FailingFactory), commits.clone());
        engine.open_buffer("cordoned off from others", 0).await.unwrap();

        let outcome = engine.arrive_new_final("completely unrelated topic today").await;
        match outcome {
            NewFinalOutcome::Interrupted { committed_text } => {
                assert_eq!(committed_text, "cordoned off from others");
            }
            NewFinalOutcome::Merged => panic!("expected an interrupt"),
        }
        assert_eq!(engine.state().await, RecoveryState::Idle);
        assert_eq!(commits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_new_final_folds_into_buffer_without_committing() {
        let commits = Arc::new(StdMutex::new(Vec::new()));
        let engine = engine(Arc::new(FailingFactory), commits.clone());
        engine.open_buffer("cordoned off from", 0).await.unwrap();

        let outcome = engine.arrive_new_final("cordoned off from others today").await;
        assert!(matches!(outcome, NewFinalOutcome::Merged));
        assert!(commits.lock().unwrap().is_empty());
        assert_eq!(engine.state().await, RecoveryState::Buffered);
    }

    #[tokio::test]
    async fn arrive_new_final_reports_no_buffer_when_idle() {
        let commits = Arc::new(StdMutex::new(Vec::new()));
        let engine = engine(Arc::new(FailingFactory), commits.clone());

        let outcome = engine.arrive_new_final("a fresh final with no buffer active").await;
        assert!(matches!(outcome, NewFinalOutcome::NoBuffer));
        assert!(commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn extending_partial_supersedes_bare_recovery_result() {
        let commits = Arc::new(StdMutex::new(Vec::new()));
        let factory = Arc::new(FakeFactory {
            text: "tables with food".to_string(),
        });
        let engine = engine(factory, commits.clone());
        engine
            .open_buffer("and go back to homes sitting around tables", 0)
            .await
            .unwrap();
        assert!(
            engine
                .arrive_extending_partial("and go back to homes sitting around tables with food and")
                .await
        );

        let rx = engine.begin_recovery(0).await.unwrap();
        let committed = rx.await.unwrap();

        assert_eq!(
            committed,
            "and go back to homes sitting around tables with food and"
        );
        assert_eq!(commits.lock().unwrap().as_slice(), [committed]);
    }

    #[tokio::test]
    async fn extending_partial_is_recorded_only_when_it_strictly_extends() {
        let commits = Arc::new(StdMutex::new(Vec::new()));
        let engine = engine(Arc::new(FailingFactory), commits);
        engine.open_buffer("cordoned off", 0).await.unwrap();

        assert!(!engine.arrive_extending_partial("cordoned").await);
        assert!(engine.arrive_extending_partial("cordoned off from others").await);
    }

    #[tokio::test]
    async fn unrelated_recovery_result_is_discarded_and_buffer_commits_unchanged() {
        let commits = Arc::new(StdMutex::new(Vec::new()));
        let factory = Arc::new(FakeFactory {
            text: "hug open".to_string(),
        });
        let engine = engine(factory, commits.clone());
        engine
            .open_buffer("rather than unplug", 0)
            .await
            .unwrap();
        let rx = engine.begin_recovery(0).await.unwrap();
        let committed = rx.await.unwrap();

        assert_eq!(committed, "rather than unplug");
        assert_eq!(commits.lock().unwrap().as_slice(), [committed]);
    }

    #[tokio::test]
    async fn interrupted_buffer_prevents_late_recovery_from_double_committing() {
        let commits = Arc::new(StdMutex::new(Vec::new()));
        let ready = Arc::new(AtomicBool::new(false));

        struct DelayedStream {
            text: String,
            ready: Arc<AtomicBool>,
        }

        #[async_trait]
        impl RecognizerStream for DelayedStream {
            async fn feed(&mut self, _samples: &[f32]) -> Result<()> {
                Ok(())
            }
            fn is_ready(&self) -> bool {
                self.ready.load(Ordering::SeqCst)
            }
            async fn finish(self: Box<Self>) -> Result<String> {
                Ok(self.text.clone())
            }
        }

        struct SlowFactory {
            text: String,
            ready: Arc<AtomicBool>,
        }

        #[async_trait]
        impl RecognizerFactory for SlowFactory {
            async fn create(&self) -> Result<Box<dyn RecognizerStream>> {
                Ok(Box::new(DelayedStream {
                    text: self.text.clone(),
                    ready: self.ready.clone(),
                }))
            }
        }

        let engine = engine(
            Arc::new(SlowFactory {
                text: "tables with food".to_string(),
                ready: ready.clone(),
            }),
            commits.clone(),
        );
        engine
            .open_buffer("and go back to homes sitting around tables", 0)
            .await
            .unwrap();
        let rx = engine.begin_recovery(0).await.unwrap();

        // Interrupt with an unrelated new final before the recognizer ever
        // becomes ready; the interrupt commits the buffer and returns to
        // IDLE while the spawned recovery task is still polling.
        let outcome = engine.arrive_new_final("a completely different sentence now").await;
        assert!(matches!(outcome, NewFinalOutcome::Interrupted { .. }));

        ready.store(true, Ordering::SeqCst);
        let _ = rx.await;

        assert_eq!(
            commits.lock().unwrap().as_slice(),
            ["and go back to homes sitting around tables".to_string()]
        );
    }
}
