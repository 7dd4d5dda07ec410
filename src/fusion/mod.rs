//! Fusion & Rerank (C7).
//!
//! Combines per-index scored hits into one ranked list: weighted-sum
//! combination, near-duplicate collapsing, rerank boosts, the
//! early-relevance preference rule, and final truncation.

use std::collections::HashMap;

use regex::Regex;
use std::sync::LazyLock;

use crate::config::FusionWeights;
use crate::corpus::ChunkStore;
use crate::index::{Method, ScoredHit};
use crate::query::normalize_decimal_separator;

#[allow(clippy::unwrap_used)]
static NUMERIC_ANCHOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:[.,]\d{2})?").unwrap());

/// A single fused, reranked result.
#[derive(Debug, Clone)]
pub struct FusedResult {
    /// The chunk this result refers to.
    pub chunk_id: u32,
    /// Final score after weighting and rerank boosts.
    pub score: f32,
    /// Methods that contributed to this result.
    pub methods: Vec<Method>,
    /// Per-method raw scores, for the methods that contributed.
    pub per_method_scores: HashMap<Method, f32>,
    /// The earliest query-variant index that surfaced this chunk.
    pub variant_index: usize,
    /// The text of the query variant that surfaced this chunk.
    pub search_variant: String,
}

struct Candidate {
    chunk_id: u32,
    combined: f32,
    per_method: HashMap<Method, f32>,
    min_variant: usize,
}

/// Fuses hits from all indexes and variants into a ranked, truncated list.
///
/// `original_query` is the raw (sanitized) query text, used for the
/// keyword-overlap boost and for extracting numeric anchors for the
/// early-relevance preference rule. `variants` is the full ordered list
/// of query variants `original_query` was expanded into (variant 0 is
/// `original_query` itself), used to recover each result's
/// `search_variant` text from its `variant_index`.
#[must_use]
pub fn fuse(
    hits: &[ScoredHit],
    chunks: &ChunkStore,
    original_query: &str,
    variants: &[String],
    weights: FusionWeights,
    top_k: usize,
) -> Vec<FusedResult> {
    // Step 2: weighted combination. Multiple hits for the same
    // (chunk, method) across variants collapse to their best score.
    let mut by_chunk: HashMap<u32, Candidate> = HashMap::new();
    let mut best_per_method: HashMap<(u32, Method), f32> = HashMap::new();

    for hit in hits {
        let key = (hit.chunk_id, hit.method);
        let entry = best_per_method.entry(key).or_insert(f32::MIN);
        if hit.raw_score > *entry {
            *entry = hit.raw_score;
        }
        let cand = by_chunk.entry(hit.chunk_id).or_insert_with(|| Candidate {
            chunk_id: hit.chunk_id,
            combined: 0.0,
            per_method: HashMap::new(),
            min_variant: hit.variant_index,
        });
        cand.min_variant = cand.min_variant.min(hit.variant_index);
    }

    for ((chunk_id, method), score) in best_per_method {
        let weight = match method {
            Method::Bm25 => weights.bm25,
            Method::Tfidf => weights.tfidf,
            Method::Dense => weights.dense,
        };
        if let Some(cand) = by_chunk.get_mut(&chunk_id) {
            cand.combined += weight * score;
            cand.per_method.insert(method, score);
        }
    }

    let mut candidates: Vec<Candidate> = by_chunk.into_values().collect();

    // Step 3: deduplicate near-identical texts, keeping the higher score.
    candidates = dedup_by_text_prefix(candidates, chunks);

    // Step 4: rerank boosts.
    let query_words: Vec<String> = original_query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_owned)
        .collect();

    let mut results: Vec<FusedResult> = candidates
        .into_iter()
        .map(|cand| {
            let methods: Vec<Method> = cand.per_method.keys().copied().collect();
            let method_scores: Vec<f32> = cand.per_method.values().copied().collect();

            let diversity_boost = 0.1 * method_scores.len() as f32;
            let consensus_boost = if method_scores.len() >= 2 {
                0.2 * (1.0 - stddev(&method_scores)).max(0.0)
            } else {
                0.0
            };
            let keyword_boost = if query_words.is_empty() {
                0.0
            } else {
                let text = chunks.get(cand.chunk_id).map(|c| c.text.to_lowercase()).unwrap_or_default();
                let matched = query_words.iter().filter(|w| text.contains(w.as_str())).count();
                0.1 * (matched as f32 / query_words.len() as f32)
            };

            let search_variant = variants.get(cand.min_variant).cloned().unwrap_or_else(|| original_query.to_string());

            FusedResult {
                chunk_id: cand.chunk_id,
                score: cand.combined + diversity_boost + consensus_boost + keyword_boost,
                methods,
                per_method_scores: cand.per_method,
                variant_index: cand.min_variant,
                search_variant,
            }
        })
        .collect();

    // Step 5: early-relevance preference. Mirrors the sequential
    // variant loop this was ported from: every variant tried up to and
    // including the one that first surfaces the numeric anchor
    // contributes its results; variants tried afterward are dropped
    // rather than included, as if the loop had broken there.
    if let Some(winner) = winning_variant(hits, chunks, original_query) {
        results.retain(|r| r.variant_index <= winner);
        results.sort_by(|a, b| {
            let a_first = usize::from(a.variant_index != winner);
            let b_first = usize::from(b.variant_index != winner);
            a_first
                .cmp(&b_first)
                .then(b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
    } else {
        // Step 6: sort by score descending, ties by ascending chunk id.
        results.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.chunk_id.cmp(&b.chunk_id))
        });
    }

    results.truncate(top_k);
    results
}

fn winning_variant(hits: &[ScoredHit], chunks: &ChunkStore, original_query: &str) -> Option<usize> {
    let normalized_query = normalize_decimal_separator(original_query);
    let anchors: Vec<String> =
        NUMERIC_ANCHOR.find_iter(&normalized_query).map(|m| m.as_str().to_string()).collect();
    if anchors.is_empty() {
        return None;
    }

    let mut candidate_variants: Vec<usize> = hits
        .iter()
        .filter(|h| h.variant_index > 0)
        .filter(|h| {
            chunks.get(h.chunk_id).is_ok_and(|c| {
                let text = normalize_decimal_separator(&c.text);
                anchors.iter().any(|a| text.contains(a.as_str()))
            })
        })
        .map(|h| h.variant_index)
        .collect();
    candidate_variants.sort_unstable();
    candidate_variants.first().copied()
}

fn dedup_by_text_prefix(candidates: Vec<Candidate>, chunks: &ChunkStore) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    let mut seen_prefixes: HashMap<String, usize> = HashMap::new();

    for cand in candidates {
        let text = chunks.get(cand.chunk_id).map(|c| c.text.as_str()).unwrap_or_default();
        let prefix = normalized_prefix(text);

        if let Some(&idx) = seen_prefixes.get(&prefix) {
            if cand.combined > kept[idx].combined {
                kept[idx] = cand;
            }
        } else {
            seen_prefixes.insert(prefix, kept.len());
            kept.push(cand);
        }
    }
    kept
}

fn normalized_prefix(text: &str) -> String {
    let lower = text.to_lowercase();
    lower.chars().take(100).collect()
}

fn stddev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}
