//! End-to-end scenarios from the spec's testable-properties section,
//! exercised against a real [`SessionController`] with fake recovery
//! collaborators and pass-through grammar/translation adapters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use verbatim_assembly::{
    AudioRingBuffer, Configuration, EventBus, InMemoryEventBus, NoopGrammarCorrector,
    NoopTranslator, QueueConfig, RateLimitConfig, RateLimiter, RecognizerFactory, RecognizerStream,
    RecoveryDependencies, RequestQueue, SessionController,
};
use verbatim_recovery::RecoveryError;
use verbatim_types::{Fragment, FragmentKind};

struct NullAudio;
impl AudioRingBuffer for NullAudio {
    fn last_window(&self, _window_ms: u32) -> Vec<f32> {
        Vec::new()
    }
}

/// A recovery recognizer factory that always fails; scenarios that never
/// open a forced-commit buffer never call it, and the one scenario that does
/// relies on the failure to fall straight back to the buffered text.
struct FailingFactory;

#[async_trait]
impl RecognizerFactory for FailingFactory {
    async fn create(&self) -> Result<Box<dyn RecognizerStream>, RecoveryError> {
        Err(RecoveryError::RecognizerUnavailable("no device in this harness".into()))
    }
}

fn harness(
    rate_limit: RateLimitConfig,
) -> (Arc<SessionController>, Arc<InMemoryEventBus>, mpsc::Sender<Fragment>) {
    let events = Arc::new(InMemoryEventBus::new());
    let limiter = Arc::new(RateLimiter::new(rate_limit, 0));
    let queue = Arc::new(RequestQueue::new(
        limiter,
        QueueConfig { max_concurrent: 4, min_interval_ms: 0 },
    ));
    let recovery_deps = RecoveryDependencies {
        config: Default::default(),
        factory: Arc::new(FailingFactory),
        audio: Arc::new(NullAudio),
    };

    let controller = SessionController::new(
        "s1",
        Configuration { rate_limit, ..Configuration::default() },
        events.clone() as Arc<dyn EventBus>,
        queue,
        recovery_deps,
        Arc::new(NoopGrammarCorrector),
        Some((Arc::new(NoopTranslator), "es".to_string())),
        CancellationToken::new(),
    );

    let (tx, rx) = mpsc::channel(16);
    let driver = Arc::clone(&controller);
    tokio::spawn(async move {
        driver.run(rx).await;
    });

    (controller, events, tx)
}

fn commits(events: &InMemoryEventBus) -> Vec<(String, bool)> {
    events
        .events_for(verbatim_events::event_names::COMMIT)
        .into_iter()
        .map(|e| {
            (
                e.payload["text"].as_str().unwrap().to_string(),
                e.payload["forced"].as_bool().unwrap(),
            )
        })
        .collect()
}

fn partial_texts(events: &InMemoryEventBus) -> Vec<String> {
    events
        .events_for(verbatim_events::event_names::PARTIAL)
        .into_iter()
        .map(|e| e.payload["text"].as_str().unwrap().to_string())
        .collect()
}

async fn send(tx: &mpsc::Sender<Fragment>, text: &str, kind: FragmentKind, seq: u64, at: i64) {
    tx.send(Fragment::new(text, kind, seq, at)).await.unwrap();
    // Give the single-threaded driver loop a chance to process before the
    // next fragment lands; these tests assert ordering, not throughput.
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// S1. Simple partial -> final: every partial is forwarded (including the
/// single-word first one), and exactly one commit is produced.
#[tokio::test(flavor = "multi_thread")]
async fn s1_simple_partial_then_final() {
    let (_controller, events, tx) = harness(RateLimitConfig::default());

    send(&tx, "I", FragmentKind::Partial, 1, 0).await;
    send(&tx, "I am", FragmentKind::Partial, 2, 10).await;
    send(&tx, "I am here", FragmentKind::Partial, 3, 20).await;
    send(&tx, "I am here.", FragmentKind::Final, 4, 30).await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    let partials = partial_texts(&events);
    assert_eq!(partials, vec!["I", "I am", "I am here"]);

    let commits = commits(&events);
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].0, "I am here.");
    assert!(!commits[0].1);
}

/// S2. Final-to-final tail overlap: a new final arriving shortly after a
/// commit has its echoed leading words stripped by the deduplicator.
#[tokio::test(flavor = "multi_thread")]
async fn s2_final_to_final_tail_overlap_deduplicates() {
    let (_controller, events, tx) = harness(RateLimitConfig::default());

    send(
        &tx,
        "I love this quote: our own self-centered desires.",
        FragmentKind::Final,
        1,
        0,
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    send(
        &tx,
        "desires to be cordoned off from others.",
        FragmentKind::Final,
        2,
        100,
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let commits = commits(&events);
    assert_eq!(commits.len(), 2);
    assert_eq!(
        commits[1].0, "to be cordoned off from others.",
        "the echoed leading word 'desires' must be stripped by the deduplicator"
    );
}

/// S5. New segment during recovery: a forced-final buffer is open when an
/// unrelated new final arrives. The buffered text must commit first (forced),
/// and the new final commits second as an ordinary commit, rather than being
/// folded into the buffer just because it shares a stray function word.
#[tokio::test(flavor = "multi_thread")]
async fn s5_unrelated_final_during_recovery_commits_both_in_order() {
    let (_controller, events, tx) = harness(RateLimitConfig::default());

    send(
        &tx,
        "desires cordoned off from others and to live apart rather than unplug and reconnect in community",
        FragmentKind::Partial,
        1,
        0,
    )
    .await;
    send(
        &tx,
        "desires cordoned off from others rather than unplug",
        FragmentKind::Final,
        2,
        10,
    )
    .await;

    send(
        &tx,
        "Open rather than closed and a niche initiate rather than stand.",
        FragmentKind::Final,
        3,
        20,
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let commits = commits(&events);
    assert_eq!(commits.len(), 2, "the buffered forced-final and the new final must both commit");
    assert_eq!(
        commits[0].0, "desires cordoned off from others rather than unplug",
        "the buffered forced-final commits first"
    );
    assert!(commits[0].1, "the first commit is forced");
    assert_eq!(
        commits[1].0, "Open rather than closed and a niche initiate rather than stand.",
        "the new final must not be folded into the buffer just because it shares 'rather than'"
    );
    assert!(!commits[1].1, "the second commit is an ordinary final, not forced");
}

/// S6. Rate-limit skip: an exhausted limiter degrades a commit's grammar
/// correction to the original text immediately; the commit itself is never
/// delayed by the limiter.
#[tokio::test(flavor = "multi_thread")]
async fn s6_rate_limit_skip_falls_back_without_delaying_commit() {
    let exhausted = RateLimitConfig {
        rpm: 0,
        tpm: 0,
        skip_threshold_ms: 2000,
        ..RateLimitConfig::default()
    };
    let (_controller, events, tx) = harness(exhausted);

    let before = tokio::time::Instant::now();
    send(&tx, "a quick final with no room left in the budget.", FragmentKind::Final, 1, 0).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    let commits = commits(&events);
    assert_eq!(commits.len(), 1, "commit must not wait on the rate limiter");
    assert!(before.elapsed() < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let grammar_updates = events.events_for(verbatim_events::event_names::GRAMMAR_UPDATE);
    assert_eq!(grammar_updates.len(), 1);
    assert_eq!(
        grammar_updates[0].payload["corrected"].as_str().unwrap(),
        "a quick final with no room left in the budget."
    );

    let translations = events.events_for(verbatim_events::event_names::TRANSLATION);
    assert_eq!(translations.len(), 1, "translation must still be attempted independently");
}

/// Duplicate suppression: a forced commit whose normalized text matches the
/// previous forced commit within the suppression window is dropped rather
/// than re-emitted (spec section 4.8 / testable property 2). Forced-final
/// detection here is the heuristic path: a final shorter than the segment's
/// recent longest partial, with a recovery recognizer that always fails and
/// so falls straight back to the buffered (i.e. original final) text.
#[tokio::test(flavor = "multi_thread")]
async fn duplicate_forced_commit_within_window_is_suppressed() {
    let (_controller, events, tx) = harness(RateLimitConfig::default());

    send(&tx, "same text here and quite a bit more besides", FragmentKind::Partial, 1, 0).await;
    send(&tx, "same text here", FragmentKind::Final, 2, 20).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    send(&tx, "same text here and quite a bit more besides", FragmentKind::Partial, 3, 200).await;
    send(&tx, "same text here", FragmentKind::Final, 4, 220).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let commits = commits(&events);
    assert_eq!(commits.len(), 1, "second identical forced commit must be suppressed");
    assert!(commits[0].1, "the surviving commit must be the forced one");
}
