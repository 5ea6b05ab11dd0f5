/// Tunables for the overlap merger, mirrored from the `overlap` section of
/// the engine's top-level configuration.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OverlapConfig {
    /// Minimum `1 - levenshtein/max_len` similarity accepted by the fuzzy pass.
    pub fuzzy_threshold: f32,
    /// Minimum similarity for `words_are_related`'s near-misspelling branch.
    pub relatedness_threshold: f32,
    /// Longest phrase (in words) tried by the phrase-overlap pass.
    pub max_phrase_words: u8,
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.72,
            relatedness_threshold: 0.85,
            max_phrase_words: 4,
        }
    }
}
