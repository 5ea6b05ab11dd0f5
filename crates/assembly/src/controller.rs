//! The Assembly Controller (spec C8): one driver per session that consumes
//! recognizer fragments and turns them into an ordered, de-duplicated
//! stream of [`Event`]s.
//!
//! All mutable per-session state lives behind a single `tokio::sync::Mutex`
//! (see [`crate::state::State`]). The normal caller is this controller's own
//! `run` loop; the one other caller is the forced-commit sink handed to the
//! recovery engine, invoked from its spawned recovery task. Neither holds
//! the lock across an await.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use verbatim_dedup::dedupe;
use verbatim_events::{Event, EventBus};
use verbatim_overlap::{merge, MergeDecision};
use verbatim_queue::{QueueError, RequestQueue};
use verbatim_ratelimit::{retry_with_backoff, RequestSpec, RetryableError};
use verbatim_recovery::{
    AudioRingBuffer, ForcedCommitEngine, ForcedCommitSink, NewFinalOutcome, RecognizerFactory,
    RecoveryConfig, RecoveryState,
};
use verbatim_types::{Commit, CommitId, Fragment, FragmentKind, Ms};

use crate::clock;
use crate::config::Configuration;
use crate::error::EngineError;
use crate::llm::{grammar_timeout, translation_timeout, GrammarCorrector, Translator};
use crate::state::{
    is_duplicate_forced_commit, normalized_starts_with, word_count, LastCommit, PendingFinal, State,
    ThrottleState,
};

/// Heuristic window within which a final shorter than the segment's longest
/// partial is treated as a forced-final (spec section 4.7 names the
/// heuristic but not an exact window; chosen here and recorded in
/// DESIGN.md).
const FORCED_FINAL_HEURISTIC_WINDOW_MS: Ms = 3_000;

/// Window within which a forced commit is checked against the previous one
/// for duplicate suppression (spec section 4.8).
const DUPLICATE_SUPPRESSION_WINDOW_MS: Ms = 10_000;

/// How far back `PartialTracker::extends` is allowed to look when resolving
/// a commit's text against the newest partial seen for the segment.
const EXTENDS_MAX_AGE_MS: Ms = 10_000;

/// A partial pipeline job is aborted in favor of a fresher one once the new
/// forward text drops below this fraction of the length of the text the
/// in-flight job was dispatched with.
const PARTIAL_SUPERSESSION_LEN_RATIO: f32 = 0.6;

/// Collaborators the recovery engine (C7) needs, bundled so
/// [`SessionController::new`] can construct it as part of the same
/// `Arc::new_cyclic` call that builds the controller.
pub struct RecoveryDependencies {
    pub config: RecoveryConfig,
    pub factory: Arc<dyn RecognizerFactory>,
    pub audio: Arc<dyn AudioRingBuffer>,
}

enum ReconcileAction {
    Fresh(String),
    CommitThenFresh(PendingFinal, String),
}

/// What a single grammar/translation attempt can fail with, fed to
/// [`retry_with_backoff`]: a timeout never retries (it isn't rate-limit
/// shaped), an upstream error retries only if it is.
enum AttemptError {
    TimedOut,
    Upstream(EngineError),
}

impl RetryableError for AttemptError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, AttemptError::Upstream(err) if err.is_rate_limited())
    }

    fn message(&self) -> Option<&str> {
        match self {
            AttemptError::Upstream(err) => err.message(),
            AttemptError::TimedOut => None,
        }
    }
}

/// Per-session driver. Construct with [`SessionController::new`], then feed
/// it fragments through [`SessionController::run`] until the channel closes
/// or the session's cancellation token fires.
pub struct SessionController {
    id: String,
    config: Configuration,
    events: Arc<dyn EventBus>,
    queue: Arc<RequestQueue>,
    recovery: Arc<ForcedCommitEngine>,
    grammar: Arc<dyn GrammarCorrector>,
    translation: Option<(Arc<dyn Translator>, String)>,
    cancel: CancellationToken,
    state: Mutex<State>,
}

/// Adapts a weak reference to the controller into the `ForcedCommitSink`
/// the recovery engine calls back into. A plain `Arc<SessionController>`
/// can't be handed to the recovery engine at construction time, since the
/// engine and the controller are built in the same cyclic step; a `Weak`
/// breaks the cycle.
struct ControllerSink(std::sync::Weak<SessionController>);

#[async_trait]
impl ForcedCommitSink for ControllerSink {
    async fn commit_forced(&self, text: String) {
        let Some(controller) = self.0.upgrade() else {
            return;
        };
        let now = clock::now_ms();
        controller.finish_commit(text, true, now).await;
    }
}

impl SessionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        config: Configuration,
        events: Arc<dyn EventBus>,
        queue: Arc<RequestQueue>,
        recovery_deps: RecoveryDependencies,
        grammar: Arc<dyn GrammarCorrector>,
        translation: Option<(Arc<dyn Translator>, String)>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let rtt_cfg = config.rtt;
        let id = id.into();
        Arc::new_cyclic(|weak| {
            let sink: Arc<dyn ForcedCommitSink> = Arc::new(ControllerSink(weak.clone()));
            let recovery = Arc::new(ForcedCommitEngine::new(
                recovery_deps.config,
                recovery_deps.factory,
                recovery_deps.audio,
                sink,
            ));
            Self {
                id,
                config,
                events,
                queue,
                recovery,
                grammar,
                translation,
                cancel,
                state: Mutex::new(State::new(rtt_cfg)),
            }
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn committed_text(&self) -> Vec<Commit> {
        self.state.lock().await.commits.clone()
    }

    /// Drive this session until `input` closes (a clean end-of-stream) or
    /// the cancellation token fires. A session-end sentinel is delivered by
    /// closing `input`, which flushes any buffered partial and any pending
    /// final before returning.
    pub async fn run(self: Arc<Self>, mut input: mpsc::Receiver<Fragment>) {
        loop {
            let throttle_deadline = self.state.lock().await.throttle.deadline;
            let pending_final_deadline = self.state.lock().await.pending_final_deadline;

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(session = %self.id, "session cancelled");
                    break;
                }

                maybe_fragment = input.recv() => {
                    match maybe_fragment {
                        Some(fragment) => self.handle_fragment(fragment).await,
                        None => {
                            self.handle_stream_end().await;
                            break;
                        }
                    }
                }

                _ = wait_until(throttle_deadline) => {
                    self.fire_throttle_timer().await;
                }

                _ = wait_until(pending_final_deadline) => {
                    self.fire_pending_final_timer().await;
                }
            }
        }
    }

    async fn handle_fragment(self: &Arc<Self>, fragment: Fragment) {
        match fragment.kind {
            FragmentKind::Partial => self.handle_partial(fragment).await,
            FragmentKind::Final => self.handle_final(fragment).await,
        }
    }

    // --- Partial arrival (spec section 4.8) ---

    async fn handle_partial(self: &Arc<Self>, fragment: Fragment) {
        let now = fragment.recv_at;

        self.state.lock().await.partial.update(&fragment.text, now);
        self.recovery.arrive_extending_partial(&fragment.text).await;

        let (forward_text, seq, offset) = {
            let mut state = self.state.lock().await;
            let mut forward_text = fragment.text.clone();

            if let Some(last) = state.last_commit.clone() {
                if now - last.committed_at <= self.config.dedup.window_ms as Ms {
                    let result = dedupe(
                        &fragment.text,
                        &last.text,
                        now,
                        last.committed_at,
                        self.config.dedup.window_ms,
                        self.config.dedup.partial_words,
                    );
                    if !result.text.is_empty() {
                        forward_text = result.text;
                    } else if normalized_starts_with(&fragment.text, &last.text) {
                        forward_text = fragment.text.clone();
                    } else {
                        forward_text.clear();
                    }
                }
            }

            let seq = state.next_seq();
            let offset = state.commits.len() as u32;
            (forward_text, seq, offset)
        };

        self.emit_event(Event::Partial {
            text: forward_text.clone(),
            seq,
            offset,
            at: now,
        });

        if forward_text.is_empty() {
            return;
        }

        self.maybe_dispatch_partial(forward_text, now).await;
    }

    /// Applies the throttle gate (spec section 4.8/5: dispatch immediately
    /// on the first partial of a segment, every `throttle.partial_ms`, on
    /// `throttle.growth_chars` of additional growth, or on a sentence
    /// terminator; otherwise buffer for the throttle timer to flush).
    async fn maybe_dispatch_partial(self: &Arc<Self>, forward_text: String, now: Ms) {
        let ends_with_terminator = forward_text.trim_end().ends_with(['.', '!', '?']);

        let dispatch_now = {
            let mut state = self.state.lock().await;
            let first = state.throttle.last_sent_at.is_none();
            let elapsed_enough = state
                .throttle
                .last_sent_at
                .map(|t| now - t >= self.config.throttle.partial_ms as Ms)
                .unwrap_or(true);
            let grew_enough = forward_text.len()
                >= state.throttle.last_sent_len + self.config.throttle.growth_chars as usize;
            let dispatch_now = first || elapsed_enough || grew_enough || ends_with_terminator;

            if dispatch_now {
                let previous_len = state.throttle.last_sent_len;
                let should_abort = state.throttle.last_job_cancel.is_some()
                    && (forward_text.len() as f32) < previous_len as f32 * PARTIAL_SUPERSESSION_LEN_RATIO;
                if should_abort {
                    if let Some(token) = state.throttle.last_job_cancel.take() {
                        trace!(session = %self.id, "aborting superseded partial pipeline job");
                        token.cancel();
                    }
                }
                state.throttle.pending_text = None;
                state.throttle.deadline = None;
                state.throttle.last_sent_at = Some(now);
                state.throttle.last_sent_len = forward_text.len();
            } else {
                state.throttle.pending_text = Some(forward_text.clone());
                let remaining = (self.config.throttle.partial_ms as Ms
                    - (now - state.throttle.last_sent_at.unwrap_or(now)))
                    .max(0);
                state.throttle.deadline =
                    Some(tokio::time::Instant::now() + Duration::from_millis(remaining as u64));
            }
            dispatch_now
        };

        if dispatch_now {
            self.dispatch_partial_pipeline(forward_text, now).await;
        }
    }

    async fn fire_throttle_timer(self: &Arc<Self>) {
        let text = {
            let mut state = self.state.lock().await;
            state.throttle.deadline = None;
            state.throttle.pending_text.take()
        };
        if let Some(text) = text {
            let now = clock::now_ms();
            {
                let mut state = self.state.lock().await;
                state.throttle.last_sent_at = Some(now);
                state.throttle.last_sent_len = text.len();
            }
            self.dispatch_partial_pipeline(text, now).await;
        }
    }

    async fn dispatch_partial_pipeline(self: &Arc<Self>, text: String, _now: Ms) {
        let segment_id = {
            let mut state = self.state.lock().await;
            state.throttle.last_job_cancel = Some(self.cancel.child_token());
            state.segment_id
        };

        let this = Arc::clone(self);
        let grammar = Arc::clone(&self.grammar);
        let translation = self.translation.clone();
        tokio::spawn(async move {
            this.run_grammar(segment_id, text.clone(), true, grammar).await;
            if let Some((translator, lang)) = translation {
                this.run_translation(segment_id, text, lang, true, translator).await;
            }
        });
    }

    // --- Final arrival (spec section 4.8) ---

    async fn handle_final(self: &Arc<Self>, fragment: Fragment) {
        let now = fragment.recv_at;
        let text = fragment.text.clone();

        if self.recovery.state().await != RecoveryState::Idle {
            if let NewFinalOutcome::Merged = self.recovery.arrive_new_final(&text).await {
                self.emit_raw_final_event(&fragment, now).await;
                return;
            }
        }

        self.emit_raw_final_event(&fragment, now).await;

        if self.looks_forced(&text, now).await {
            self.open_and_recover(text, now).await;
            return;
        }

        self.reconcile_pending_final(text, now).await;
    }

    async fn emit_raw_final_event(self: &Arc<Self>, fragment: &Fragment, now: Ms) {
        let (seq, offset) = {
            let mut state = self.state.lock().await;
            (state.next_seq(), state.commits.len() as u32)
        };
        self.emit_event(Event::Final {
            text: fragment.text.clone(),
            seq,
            offset,
            at: now,
        });
    }

    /// Upstream markers aren't available to this crate, so forced-finals
    /// are detected heuristically: a final shorter than the segment's
    /// longest recent partial almost always clipped its tail.
    async fn looks_forced(&self, text: &str, now: Ms) -> bool {
        let state = self.state.lock().await;
        let snapshot = state.partial.snapshot();
        if snapshot.longest.is_empty() {
            return false;
        }
        let recent = now - snapshot.longest_at <= FORCED_FINAL_HEURISTIC_WINDOW_MS;
        recent && word_count(text) < word_count(&snapshot.longest)
    }

    async fn open_and_recover(self: &Arc<Self>, text: String, now: Ms) {
        if let Err(err) = self.recovery.open_buffer(text.clone(), now).await {
            warn!(session = %self.id, %err, "could not open forced-final buffer; committing directly");
            self.finish_commit(text, true, now).await;
            return;
        }
        if let Err(err) = self.recovery.begin_recovery(now).await {
            warn!(session = %self.id, %err, "could not start recovery");
        }
    }

    async fn reconcile_pending_final(self: &Arc<Self>, text: String, now: Ms) {
        let action = {
            let mut state = self.state.lock().await;
            match state.pending_final.take() {
                None => ReconcileAction::Fresh(text.clone()),
                Some(pending) => {
                    if normalized_starts_with(&text, &pending.text) {
                        ReconcileAction::Fresh(text.clone())
                    } else {
                        let result = merge(&pending.text, &text);
                        if result.decision == MergeDecision::Reject {
                            ReconcileAction::CommitThenFresh(pending, text.clone())
                        } else {
                            ReconcileAction::Fresh(result.text)
                        }
                    }
                }
            }
        };

        match action {
            ReconcileAction::Fresh(new_text) => self.open_pending_final(new_text, now).await,
            ReconcileAction::CommitThenFresh(old_pending, new_text) => {
                self.resolve_pending_final(old_pending).await;
                self.open_pending_final(new_text, now).await;
            }
        }
    }

    async fn open_pending_final(self: &Arc<Self>, text: String, now: Ms) {
        if text.trim_end().ends_with(['.', '!', '?']) {
            self.resolve_pending_final(PendingFinal { text, at: now }).await;
            return;
        }

        let mut state = self.state.lock().await;
        let lookahead_ms = state.rtt.adaptive_lookahead_ms();
        state.pending_final = Some(PendingFinal { text, at: now });
        state.pending_final_deadline =
            Some(tokio::time::Instant::now() + Duration::from_millis(lookahead_ms as u64));
    }

    async fn fire_pending_final_timer(self: &Arc<Self>) {
        let pending = {
            let mut state = self.state.lock().await;
            state.pending_final_deadline = None;
            state.pending_final.take()
        };
        if let Some(pending) = pending {
            self.resolve_pending_final(pending).await;
        }
    }

    async fn resolve_pending_final(self: &Arc<Self>, pending: PendingFinal) {
        let now = clock::now_ms();
        let (prev_text, prev_at) = {
            let state = self.state.lock().await;
            (
                state.last_original_commit_text.clone(),
                state.last_commit.as_ref().map(|c| c.committed_at).unwrap_or(Ms::MIN / 2),
            )
        };

        let result = dedupe(
            &pending.text,
            &prev_text,
            now,
            prev_at,
            self.config.dedup.window_ms,
            self.config.dedup.final_words,
        );
        if result.text.is_empty() {
            debug!(session = %self.id, "pending final deduplicated to nothing; dropped");
            return;
        }

        self.commit_final(result.text, now).await;
    }

    async fn commit_final(self: &Arc<Self>, text: String, now: Ms) {
        let resolved = {
            let mut state = self.state.lock().await;
            match state.partial.extends(&text, now, EXTENDS_MAX_AGE_MS) {
                Some(ext) if ext.full_text.len() > text.len() => ext.full_text,
                _ => text,
            }
        };
        self.finish_commit(resolved, false, now).await;
    }

    /// The commit procedure shared by both the ordinary-final path and the
    /// forced-commit sink. Duplicate suppression only ever applies to
    /// forced commits; an ordinary commit already passed through dedup
    /// against the previous commit in [`Self::resolve_pending_final`].
    async fn finish_commit(self: &Arc<Self>, text: String, forced: bool, now: Ms) {
        let commit_id;
        {
            let mut state = self.state.lock().await;
            if forced {
                if let Some(last) = &state.last_commit {
                    if now - last.committed_at <= DUPLICATE_SUPPRESSION_WINDOW_MS
                        && is_duplicate_forced_commit(&text, &last.text, last.forced)
                    {
                        debug!(session = %self.id, "duplicate forced commit suppressed");
                        return;
                    }
                }
            }

            commit_id = state.segment_id;
            let prev_commit_id = state.last_commit.as_ref().map(|c| c.id);
            state.commits.push(Commit {
                id: commit_id,
                text: text.clone(),
                forced,
                committed_at: now,
                prev_commit_id,
            });
            state.last_commit = Some(LastCommit {
                id: commit_id,
                text: text.clone(),
                forced,
                committed_at: now,
            });
            state.last_original_commit_text = text.clone();
            state.partial.snapshot_and_reset();
            state.throttle = ThrottleState::default();
            state.pending_final = None;
            state.pending_final_deadline = None;
            state.segment_id = Uuid::new_v4();
        }

        info!(session = %self.id, %commit_id, forced, "commit emitted");
        self.emit_event(Event::Commit {
            id: commit_id,
            text: text.clone(),
            forced,
            at: now,
        });

        self.dispatch_commit_pipeline(commit_id, text).await;
    }

    async fn dispatch_commit_pipeline(self: &Arc<Self>, commit_id: CommitId, text: String) {
        let grammar = Arc::clone(&self.grammar);
        let this = Arc::clone(self);
        let text_for_grammar = text.clone();
        tokio::spawn(async move {
            this.run_grammar(commit_id, text_for_grammar, false, grammar).await;
        });

        if let Some((translator, lang)) = self.translation.clone() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.run_translation(commit_id, text, lang, false, translator).await;
            });
        }
    }

    async fn handle_stream_end(self: &Arc<Self>) {
        let pending = self.state.lock().await.pending_final.take();
        if let Some(pending) = pending {
            self.resolve_pending_final(pending).await;
        }

        let buffered = self.state.lock().await.throttle.pending_text.take();
        if let Some(text) = buffered {
            self.dispatch_partial_pipeline(text, clock::now_ms()).await;
        }
    }

    // --- LLM dispatch (C6) ---

    async fn run_grammar(
        self: &Arc<Self>,
        commit_id: CommitId,
        original: String,
        is_partial: bool,
        grammar: Arc<dyn GrammarCorrector>,
    ) {
        let outer_cancel = self.cancel.child_token();
        let job_cancel = outer_cancel.clone();
        let timeout = grammar_timeout(is_partial, grammar.is_slow_backend());
        let spec = RequestSpec { message_chars: original.len() as u64, max_tokens: 512 };
        let session_id = self.id.clone();
        let text_for_job = original.clone();
        let fallback_text = original.clone();
        let started = Instant::now();
        let limiter = Arc::clone(self.queue.limiter());
        let rate_cfg = self.config.rate_limit;

        let result = self
            .queue
            .submit(Some(session_id.as_str()), spec, &outer_cancel, move || async move {
                let attempt = retry_with_backoff(
                    &limiter,
                    &rate_cfg,
                    || async {
                        match tokio::time::timeout(timeout, grammar.correct(&text_for_job, &job_cancel)).await {
                            Ok(Ok(corrected)) => Ok(corrected),
                            Ok(Err(err)) => Err(AttemptError::Upstream(err)),
                            Err(_elapsed) => Err(AttemptError::TimedOut),
                        }
                    },
                    |retry_attempt, delay| {
                        debug!(
                            session = %session_id,
                            retry_attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying grammar correction after a rate-limited response"
                        );
                    },
                )
                .await;

                match attempt {
                    Ok(corrected) => corrected,
                    Err(AttemptError::TimedOut) => {
                        warn!("grammar correction timed out; keeping original");
                        fallback_text
                    }
                    Err(AttemptError::Upstream(err)) => {
                        warn!(%err, "grammar adapter failed after retries; keeping original");
                        fallback_text
                    }
                }
            })
            .await;

        let corrected = match result {
            Ok(text) => text,
            Err(QueueError::Skipped) => {
                debug!(session = %self.id, %commit_id, "grammar correction skipped by rate limiter");
                original.clone()
            }
            Err(_) => original.clone(),
        };

        self.record_rtt(started.elapsed()).await;
        self.emit_event(Event::GrammarUpdate {
            commit_id,
            original,
            corrected,
            at: clock::now_ms(),
        });
    }

    async fn run_translation(
        self: &Arc<Self>,
        commit_id: CommitId,
        original: String,
        lang: String,
        is_partial: bool,
        translator: Arc<dyn Translator>,
    ) {
        let outer_cancel = self.cancel.child_token();
        let job_cancel = outer_cancel.clone();
        let timeout = translation_timeout(is_partial);
        let spec = RequestSpec { message_chars: original.len() as u64, max_tokens: 512 };
        let session_id = self.id.clone();
        let text_for_job = original.clone();
        let lang_for_job = lang.clone();
        let fallback_text = original.clone();
        let started = Instant::now();
        let limiter = Arc::clone(self.queue.limiter());
        let rate_cfg = self.config.rate_limit;

        let result = self
            .queue
            .submit(Some(session_id.as_str()), spec, &outer_cancel, move || async move {
                let attempt = retry_with_backoff(
                    &limiter,
                    &rate_cfg,
                    || async {
                        match tokio::time::timeout(
                            timeout,
                            translator.translate(&text_for_job, &lang_for_job, &job_cancel),
                        )
                        .await
                        {
                            Ok(Ok(translated)) => {
                                let echoed_or_empty =
                                    translated.trim().is_empty() || translated == text_for_job;
                                if echoed_or_empty {
                                    Err(AttemptError::Upstream(EngineError::EmptyOrEchoedTranslation))
                                } else {
                                    Ok(translated)
                                }
                            }
                            Ok(Err(err)) => Err(AttemptError::Upstream(err)),
                            Err(_elapsed) => Err(AttemptError::TimedOut),
                        }
                    },
                    |retry_attempt, delay| {
                        debug!(
                            session = %session_id,
                            retry_attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying translation after a rate-limited response"
                        );
                    },
                )
                .await;

                match attempt {
                    Ok(translated) => translated,
                    Err(AttemptError::TimedOut) => {
                        warn!("translation timed out; keeping original");
                        fallback_text
                    }
                    Err(AttemptError::Upstream(err)) => {
                        warn!(%err, "translator failed after retries; keeping original");
                        fallback_text
                    }
                }
            })
            .await;

        let translated = match result {
            Ok(text) => text,
            Err(QueueError::Skipped) => {
                debug!(session = %self.id, %commit_id, "translation skipped by rate limiter");
                original.clone()
            }
            Err(_) => original.clone(),
        };

        self.record_rtt(started.elapsed()).await;
        self.emit_event(Event::Translation {
            commit_id,
            lang,
            text: translated,
            is_partial,
            at: clock::now_ms(),
        });
    }

    async fn record_rtt(self: &Arc<Self>, elapsed: std::time::Duration) {
        let elapsed_ms = elapsed.as_millis() as Ms;
        let recorded = {
            let mut state = self.state.lock().await;
            state.rtt.record(elapsed_ms)
        };
        if recorded {
            self.emit_event(Event::LatencyReport {
                value_ms: elapsed_ms as u64,
                at: clock::now_ms(),
            });
        }
    }

    fn emit_event(&self, event: Event) {
        let payload = serde_json::to_value(&event).expect("Event always serializes");
        self.events.emit(event.topic(), payload);
    }
}

async fn wait_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending::<()>().await,
    }
}
