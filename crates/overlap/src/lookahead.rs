//! Strips words from the end of a just-computed tail when a known
//! look-ahead fragment (the next partial and/or the next final) is about to
//! re-emit them, so a commit never contains text the stream will repeat.

use crate::compound::is_compound_mismatch;
use crate::config::OverlapConfig;
use crate::normalize::{compare_words, split_words};
use crate::relatedness::words_are_related_with_threshold;

const LOOKAHEAD_PHRASE_WINDOW: usize = 6;
const LOOKAHEAD_WORD_WINDOW: usize = 5;

/// Strip from the end of `tail` any trailing phrase (2-4 words) that also
/// appears within the first 6 words of a look-ahead, falling back to
/// word-by-word trailing removal against its first 5 words.
pub fn dedupe_tail_against_lookahead(tail: &str, lookaheads: &[&str], cfg: &OverlapConfig) -> String {
    if tail.is_empty() {
        return String::new();
    }
    let tail_display = split_words(tail);
    let tail_cmp = compare_words(tail);

    for lookahead in lookaheads.iter().filter(|l| !l.is_empty()) {
        let la_cmp = compare_words(lookahead);
        let la_window: Vec<String> = la_cmp.iter().take(LOOKAHEAD_PHRASE_WINDOW).cloned().collect();

        if let Some(strip_len) = phrase_strip_len(&tail_cmp, &la_window, cfg) {
            if strip_len > 0 {
                return tail_display[..tail_display.len() - strip_len].join(" ");
            }
        }
    }

    for lookahead in lookaheads.iter().filter(|l| !l.is_empty()) {
        let la_cmp = compare_words(lookahead);
        let la_first: Vec<String> = la_cmp.iter().take(LOOKAHEAD_WORD_WINDOW).cloned().collect();
        let strip_len = word_strip_len(&tail_cmp, &la_first, cfg);
        if strip_len > 0 {
            return tail_display[..tail_display.len() - strip_len].join(" ");
        }
    }

    tail_display.join(" ")
}

/// Longest trailing 2-4 word phrase of `tail_cmp` found anywhere within
/// `la_window`; `None` if no phrase length was even attempted (tail too
/// short), `Some(0)` if attempted but nothing matched.
fn phrase_strip_len(tail_cmp: &[String], la_window: &[String], cfg: &OverlapConfig) -> Option<usize> {
    let max_l = (cfg.max_phrase_words as usize).min(tail_cmp.len()).min(la_window.len());
    if max_l < 2 {
        return None;
    }
    for l in (2..=max_l).rev() {
        let phrase = &tail_cmp[tail_cmp.len() - l..];
        for i in 0..=(la_window.len() - l) {
            let window = &la_window[i..i + l];
            if phrase.iter().zip(window.iter()).all(|(a, b)| {
                a == b
                    || (words_are_related_with_threshold(a, b, cfg.relatedness_threshold)
                        && !is_compound_mismatch(a, b))
            }) {
                return Some(l);
            }
        }
    }
    Some(0)
}

/// Count of contiguous trailing words in `tail_cmp` that match, in order,
/// the first words of `la_first` (tail's last word vs. look-ahead's first,
/// tail's second-to-last vs. look-ahead's second, ...).
fn word_strip_len(tail_cmp: &[String], la_first: &[String], cfg: &OverlapConfig) -> usize {
    let mut count = 0;
    for (i, la_word) in la_first.iter().enumerate() {
        if i >= tail_cmp.len() {
            break;
        }
        let tail_word = &tail_cmp[tail_cmp.len() - 1 - i];
        let related = tail_word == la_word
            || words_are_related_with_threshold(tail_word, la_word, cfg.relatedness_threshold);
        if related && !is_compound_mismatch(tail_word, la_word) {
            count += 1;
        } else {
            break;
        }
    }
    count
}
