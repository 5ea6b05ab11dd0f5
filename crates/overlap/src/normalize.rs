//! Word splitting and the punctuation stripping used for comparisons.

/// Punctuation stripped from the edges of a word before comparison.
const PUNCT: &[char] = &['.', ',', '!', '?', ';', ':', '-', '\'', '"', '(', ')'];

/// Sentence-ending punctuation stripped from the tail of a whole string.
const SENTENCE_END: &[char] = &['.', '!', '?'];

/// Split on whitespace, preserving original case and punctuation. This is
/// what callers reconstruct output text from.
pub fn split_words(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Lowercase a word and strip leading/trailing punctuation for comparison.
/// Interior punctuation (apostrophes inside contractions, hyphens inside
/// compounds) is intentionally left alone, only edges are stripped.
pub fn clean_word(word: &str) -> String {
    word.trim_matches(PUNCT).to_lowercase()
}

/// Strip trailing sentence punctuation and collapse internal whitespace to
/// single spaces, preserving case. Used before handing a string to the
/// merger as a whole (steps described in spec section 4.1.1).
pub fn normalize_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(SENTENCE_END).to_string()
}

/// Cleaned, lowercased words used purely for comparison.
pub fn compare_words(text: &str) -> Vec<String> {
    split_words(text)
        .into_iter()
        .map(clean_word)
        .filter(|w| !w.is_empty())
        .collect()
}
