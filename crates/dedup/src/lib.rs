//! Removes leading words from a newly arrived fragment that merely echo the
//! tail of the previous commit, the recognizer re-stating words it already
//! confirmed when a new partial/final opens.

use verbatim_overlap::words_are_related;

/// Tunables mirrored from the `dedup` section of the engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DedupConfig {
    /// Only dedupe against a previous commit within this many ms.
    pub window_ms: u32,
    /// Max prefix/suffix word pairs examined for a partial fragment.
    pub partial_words: u8,
    /// Max prefix/suffix word pairs examined for a final fragment.
    pub final_words: u8,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: 5000,
            partial_words: 3,
            final_words: 5,
        }
    }
}

/// Outcome of running the deduplicator over one fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupResult {
    pub text: String,
    pub removed: u32,
    pub changed: bool,
}

/// Minimum cleaned word length considered for matching (spec: "length > 2").
const MIN_WORD_LEN: usize = 3;

/// Remove leading words of `new_text` that echo the tail of `prev_text`, if
/// `new_text` arrived within `window_ms` of `prev_commit_at`. `n` is the
/// number of prefix/suffix pairs to examine (3 for partials, 5 for finals
/// per the defaults in [`DedupConfig`]).
pub fn dedupe(
    new_text: &str,
    prev_text: &str,
    now: i64,
    prev_commit_at: i64,
    window_ms: u32,
    n: u8,
) -> DedupResult {
    if prev_text.is_empty() || now - prev_commit_at > window_ms as i64 {
        return finalize(new_text.to_string(), 0);
    }

    let raw_words: Vec<&str> = new_text.split_whitespace().collect();
    let new_filtered: Vec<(usize, String)> = raw_words
        .iter()
        .enumerate()
        .map(|(i, w)| (i, clean(w)))
        .filter(|(_, w)| w.chars().count() >= MIN_WORD_LEN)
        .collect();

    let prev_raw_words: Vec<&str> = prev_text.split_whitespace().collect();
    let prev_filtered: Vec<String> = prev_raw_words
        .iter()
        .map(|w| clean(w))
        .filter(|w| w.chars().count() >= MIN_WORD_LEN)
        .collect();

    let max_pairs = (n as usize).min(new_filtered.len()).min(prev_filtered.len());
    let mut matched = 0usize;
    for i in 0..max_pairs {
        let new_word = &new_filtered[i].1;
        let prev_word = &prev_filtered[prev_filtered.len() - 1 - i];
        if new_word == prev_word || words_are_related(new_word, prev_word) {
            matched += 1;
        } else {
            break;
        }
    }

    if matched == 0 {
        return finalize(new_text.to_string(), 0);
    }

    let cutoff_raw_idx = new_filtered[matched - 1].0;
    let remainder = raw_words[cutoff_raw_idx + 1..].join(" ");
    finalize(remainder, matched as u32)
}

fn finalize(text: String, removed: u32) -> DedupResult {
    let non_space = text.chars().filter(|c| !c.is_whitespace()).count();
    if non_space < 3 {
        DedupResult {
            text: String::new(),
            removed,
            changed: true,
        }
    } else {
        DedupResult {
            text,
            removed,
            changed: removed > 0,
        }
    }
}

fn clean(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}
