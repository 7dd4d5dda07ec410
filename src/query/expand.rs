//! Query variant expansion (C6).
//!
//! Deterministic, rule-based generation of query derivatives to improve
//! recall, grounded in the numeric-anchor and intent-seed rules observed
//! in the source system. The rule set is closed: nothing is invented
//! outside the rules below, and the original query is always variant 0.

use regex::Regex;
use std::sync::LazyLock;

/// Hard cap on the number of variants returned.
pub const MAX_VARIANTS: usize = 8;

#[allow(clippy::unwrap_used)]
static DECIMAL_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+),(\d{2})\b").unwrap());

#[allow(clippy::unwrap_used)]
static CURRENCY_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"S/\s*(\d+(?:[.,]\d{2})?)").unwrap());

const INTENT_SEED_WORDS: &[&str] = &["monto", "cantidad", "precio", "tarifa"];

/// Expands `sanitized_query` into an ordered, deduplicated list of
/// variants, `1 <= len <= 8`. Variant 0 is always the original query.
#[must_use]
pub fn expand(sanitized_query: &str) -> Vec<String> {
    let mut variants = vec![sanitized_query.to_string()];

    let normalized = normalize_decimal_separator(sanitized_query);
    push_unique(&mut variants, normalized);

    if let Some(caps) = CURRENCY_AMOUNT.captures(sanitized_query) {
        let amount_raw = caps.get(1).map_or("", |m| m.as_str()).to_string();
        let amount_with_dot = amount_raw.replace(',', ".");
        let amount_with_comma = amount_raw.replace('.', ",");

        push_unique(&mut variants, format!("S/ {amount_raw}"));
        push_unique(&mut variants, amount_raw);
        push_unique(&mut variants, amount_with_dot);
        push_unique(&mut variants, amount_with_comma);
        push_unique(&mut variants, "viático día".to_string());
        push_unique(&mut variants, "escala viáticos".to_string());
    }

    let lower = sanitized_query.to_lowercase();
    if INTENT_SEED_WORDS.iter().any(|w| lower.contains(w)) {
        push_unique(&mut variants, "escala viáticos".to_string());
        push_unique(&mut variants, "viático por día".to_string());
    }

    variants.truncate(MAX_VARIANTS);
    variants
}

/// Rewrites comma decimal separators (`320,00`) to dot form (`320.00`),
/// the canonical form chunk text is stored in. Shared with [`crate::fusion`]
/// so numeric-anchor matching compares like with like.
#[must_use]
pub fn normalize_decimal_separator(text: &str) -> String {
    DECIMAL_COMMA.replace_all(text, "$1.$2").into_owned()
}

fn push_unique(variants: &mut Vec<String>, candidate: String) {
    if !variants.iter().any(|v| v == &candidate) {
        variants.push(candidate);
    }
}
