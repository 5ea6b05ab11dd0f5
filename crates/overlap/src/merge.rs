//! The overlap merger itself: six strategies tried in strict order, first
//! success wins.

use crate::compound::is_compound_mismatch;
use crate::config::OverlapConfig;
use crate::lookahead::dedupe_tail_against_lookahead;
use crate::normalize::{compare_words, normalize_text, split_words};
use crate::relatedness::{similarity, words_are_related_with_threshold};

/// Which strategy produced a [`MergeResult`], and the evidence behind it.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeDecision {
    /// `buffered` was a missing-prefix of `candidate`; `candidate` is used verbatim.
    PrefixOverlap,
    /// A 2-4 word phrase from the tail of `buffered` was found inside `candidate`.
    PhraseOverlap { phrase_len: usize },
    /// A single word from the tail of `buffered` was found inside `candidate`.
    WordOverlap,
    /// No exact/related match; the closest word pair cleared the fuzzy threshold.
    FuzzyOverlap { score: f32 },
    /// No overlap found at all; `candidate` was appended whole.
    FullAppend,
    /// Both inputs normalized to empty text.
    Reject,
}

/// Outcome of a merge: the strategy used and the resulting text.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub decision: MergeDecision,
    pub text: String,
}

/// Merge `buffered` and `candidate` with no look-ahead deduplication.
pub fn merge(buffered: &str, candidate: &str) -> MergeResult {
    merge_with_lookahead(buffered, candidate, &[], &OverlapConfig::default())
}

/// Merge `buffered` and `candidate`, stripping from the resulting tail any
/// phrase/word that also appears near the start of `lookaheads` (the next
/// known partial and/or final), so the committed text never re-states words
/// the next fragment will re-emit.
pub fn merge_with_lookahead(
    buffered: &str,
    candidate: &str,
    lookaheads: &[&str],
    cfg: &OverlapConfig,
) -> MergeResult {
    let norm_buffered = normalize_text(buffered);
    let norm_candidate = normalize_text(candidate);

    if norm_buffered.is_empty() && norm_candidate.is_empty() {
        return MergeResult {
            decision: MergeDecision::Reject,
            text: String::new(),
        };
    }
    if norm_buffered.is_empty() {
        return MergeResult {
            decision: MergeDecision::FullAppend,
            text: norm_candidate,
        };
    }
    if norm_candidate.is_empty() {
        return MergeResult {
            decision: MergeDecision::FullAppend,
            text: norm_buffered,
        };
    }

    let buffered_display = split_words(&norm_buffered);
    let candidate_display = split_words(&norm_candidate);
    let buffered_cmp = compare_words(&norm_buffered);
    let candidate_cmp = compare_words(&norm_candidate);

    if let Some(result) = try_prefix_overlap(&buffered_cmp, &candidate_cmp, &norm_candidate) {
        return result;
    }

    if let Some((phrase_len, tail_start)) = try_phrase_overlap(&buffered_cmp, &candidate_cmp, cfg)
    {
        let tail = join_tail(&candidate_display, tail_start, lookaheads, cfg);
        return MergeResult {
            decision: MergeDecision::PhraseOverlap { phrase_len },
            text: compose(&norm_buffered, &tail),
        };
    }

    if let Some(tail_start) = try_word_overlap(&buffered_cmp, &candidate_cmp, cfg) {
        let tail = join_tail(&candidate_display, tail_start, lookaheads, cfg);
        return MergeResult {
            decision: MergeDecision::WordOverlap,
            text: compose(&norm_buffered, &tail),
        };
    }

    if let Some((tail_start, score)) = try_fuzzy_overlap(&buffered_cmp, &candidate_cmp, cfg) {
        let tail = join_tail(&candidate_display, tail_start, lookaheads, cfg);
        return MergeResult {
            decision: MergeDecision::FuzzyOverlap { score },
            text: compose(&norm_buffered, &tail),
        };
    }

    let tail = join_tail(&candidate_display, 0, lookaheads, cfg);
    MergeResult {
        decision: MergeDecision::FullAppend,
        text: compose(&norm_buffered, &tail),
    }
}

fn compose(buffered: &str, tail: &str) -> String {
    if tail.is_empty() {
        buffered.to_string()
    } else {
        format!("{buffered} {tail}")
    }
}

fn join_tail(
    candidate_display: &[&str],
    tail_start: usize,
    lookaheads: &[&str],
    cfg: &OverlapConfig,
) -> String {
    let tail = candidate_display[tail_start.min(candidate_display.len())..].join(" ");
    dedupe_tail_against_lookahead(&tail, lookaheads, cfg)
}

/// Step 2: `buffered` equals the suffix of `candidate`'s word sequence.
fn try_prefix_overlap(
    buffered_cmp: &[String],
    candidate_cmp: &[String],
    norm_candidate: &str,
) -> Option<MergeResult> {
    if buffered_cmp.is_empty() || buffered_cmp.len() > candidate_cmp.len() {
        return None;
    }
    let suffix_start = candidate_cmp.len() - buffered_cmp.len();
    if &candidate_cmp[suffix_start..] == buffered_cmp {
        // Only meaningful when candidate actually carries a missing prefix;
        // an exact equal-length match is handled identically (candidate wins).
        return Some(MergeResult {
            decision: MergeDecision::PrefixOverlap,
            text: norm_candidate.to_string(),
        });
    }
    None
}

/// Step 3: longest-phrase-first, leftmost-in-candidate search for a 2-4
/// word run from the tail of `buffered` inside `candidate`.
fn try_phrase_overlap(
    buffered_cmp: &[String],
    candidate_cmp: &[String],
    cfg: &OverlapConfig,
) -> Option<(usize, usize)> {
    let max_l = (cfg.max_phrase_words as usize)
        .min(buffered_cmp.len())
        .min(candidate_cmp.len());
    if max_l < 2 {
        return None;
    }

    for l in (2..=max_l).rev() {
        let phrase = &buffered_cmp[buffered_cmp.len() - l..];
        if candidate_cmp.len() < l {
            continue;
        }
        for i in 0..=(candidate_cmp.len() - l) {
            let window = &candidate_cmp[i..i + l];
            if phrase_matches(phrase, window, cfg) {
                return Some((l, i + l));
            }
        }
    }
    None
}

fn phrase_matches(phrase: &[String], window: &[String], cfg: &OverlapConfig) -> bool {
    phrase.iter().zip(window.iter()).all(|(a, b)| {
        a == b
            || (words_are_related_with_threshold(a, b, cfg.relatedness_threshold)
                && !is_compound_mismatch(a, b))
    })
}

/// Step 4: scan `buffered` from its last word backward; for each, scan
/// `candidate` left to right for the first exact/related, non-compound-
/// mismatched hit.
fn try_word_overlap(
    buffered_cmp: &[String],
    candidate_cmp: &[String],
    cfg: &OverlapConfig,
) -> Option<usize> {
    for bw in buffered_cmp.iter().rev() {
        for (i, cw) in candidate_cmp.iter().enumerate() {
            let related = bw == cw
                || words_are_related_with_threshold(bw, cw, cfg.relatedness_threshold);
            if related && !is_compound_mismatch(bw, cw) {
                return Some(i + 1);
            }
        }
    }
    None
}

/// Step 5: among the last 6 words of `buffered` and all words of
/// `candidate` (both sides length >= 2), the best-scoring pair above
/// `fuzzy_threshold` wins; ties break leftmost-in-candidate.
fn try_fuzzy_overlap(
    buffered_cmp: &[String],
    candidate_cmp: &[String],
    cfg: &OverlapConfig,
) -> Option<(usize, f32)> {
    let start = buffered_cmp.len().saturating_sub(6);
    let window = &buffered_cmp[start..];

    let mut best: Option<(usize, f32)> = None;
    for bw in window.iter().filter(|w| w.len() >= 2) {
        for (i, cw) in candidate_cmp.iter().enumerate().filter(|(_, w)| w.len() >= 2) {
            let score = similarity(bw, cw);
            if score < cfg.fuzzy_threshold {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((i, score)),
            }
        }
    }
    best.map(|(i, score)| (i + 1, score))
}
