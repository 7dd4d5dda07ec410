//! Tokenizer/Normalizer (C1).
//!
//! A single pure function, [`tokenize`], used identically at index-build
//! time and query time — any divergence between the two would silently
//! invalidate the BM25 and TF-IDF indexes, so there is exactly one
//! implementation and no mutable state.

use unicode_normalization::UnicodeNormalization;

/// Spanish stopwords dropped during tokenization.
///
/// Matches the closed list used by the reference implementation's domain
/// and relevance checks, extended with standard function words so the
/// tokenizer's stopword set is self-consistent.
const STOPWORDS: &[&str] = &[
    "el", "la", "los", "las", "de", "del", "en", "y", "a", "es", "por", "para", "con", "su",
    "sus", "que", "se", "un", "una", "unos", "unas", "al", "lo", "como", "o", "u", "e", "ni",
    "pero", "sino", "si", "no", "mas", "muy", "sin", "sobre", "entre", "hasta", "desde", "este",
    "esta", "estos", "estas", "ese", "esa", "esos", "esas", "le", "les", "les", "nos", "ya",
];

/// Tokenizes `text` into lowercase, diacritic-stripped, stopword-free tokens.
///
/// Steps, in order: NFD-decompose and strip combining marks, lowercase,
/// replace non-letter/non-digit/non-whitespace code points with a space,
/// collapse whitespace, split, drop stopwords, drop tokens shorter than 2
/// characters. Deterministic; a pure function of `text` and the frozen
/// stopword list above.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    let cleaned: String = folded
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|tok| tok.chars().count() >= 2)
        .filter(|tok| !STOPWORDS.contains(tok))
        .map(str::to_owned)
        .collect()
}

/// Rejoins a token sequence with single spaces, for idempotence testing.
#[must_use]
pub fn tokenize_text(tokens: &[String]) -> String {
    tokens.join(" ")
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F)
}
