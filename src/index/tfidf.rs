//! TF-IDF Index (C4).
//!
//! Sparse cosine retrieval over the chunk store using a fitted vocabulary
//! and document-row matrix. Built once, immutable after construction.

use std::collections::HashMap;

use crate::corpus::ChunkStore;
use crate::tokenizer::tokenize;

/// A single sparse row in CSR-like form: `(column, value)` pairs.
pub type SparseRow = Vec<(u32, f32)>;

/// Fitted TF-IDF vector space over a fixed chunk store.
#[derive(Debug, Clone)]
pub struct TfidfIndex {
    vocab: HashMap<String, u32>,
    idf: Vec<f32>,
    rows: Vec<SparseRow>,
}

impl TfidfIndex {
    /// Fits a vocabulary and IDF vector from `chunks`, then builds one
    /// L2-normalized sparse row per chunk.
    #[must_use]
    pub fn build(chunks: &ChunkStore) -> Self {
        let mut vocab: HashMap<String, u32> = HashMap::new();
        let mut doc_freq: Vec<u32> = Vec::new();

        for chunk in chunks.iter() {
            let mut seen = std::collections::HashSet::new();
            for tok in &chunk.tokens {
                if seen.insert(tok.as_str()) {
                    let next_col = vocab.len() as u32;
                    let col = *vocab.entry(tok.clone()).or_insert(next_col);
                    if col as usize == doc_freq.len() {
                        doc_freq.push(0);
                    }
                    doc_freq[col as usize] += 1;
                }
            }
        }

        let n = chunks.len() as f32;
        let idf: Vec<f32> = doc_freq
            .iter()
            .map(|&df| ((n + 1.0) / (f32::from(u16::try_from(df.min(65535)).unwrap_or(u16::MAX)) + 1.0)).ln() + 1.0)
            .collect();

        let rows = chunks
            .iter()
            .map(|chunk| build_row(&chunk.tokens, &vocab, &idf))
            .collect();

        Self { vocab, idf, rows }
    }

    /// Constructs an index from already-computed artifact fields.
    #[must_use]
    pub const fn from_parts(vocab: HashMap<String, u32>, idf: Vec<f32>, rows: Vec<SparseRow>) -> Self {
        Self { vocab, idf, rows }
    }

    /// Scores `query_text` against every chunk row and returns the top
    /// `top_k` hits, score descending, ties by ascending chunk id.
    ///
    /// The query is tokenized with the identical pipeline used at build
    /// time. Unknown tokens contribute zero; an empty query vector yields
    /// an empty result, not an error.
    #[must_use]
    pub fn search(&self, query_text: &str, top_k: usize) -> Vec<(u32, f32)> {
        let tokens = tokenize(query_text);
        let query_row = build_row(&tokens, &self.vocab, &self.idf);
        if query_row.is_empty() {
            return Vec::new();
        }
        let query_map: HashMap<u32, f32> = query_row.into_iter().collect();

        let mut scored: Vec<(u32, f32)> = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(id, row)| {
                let dot: f32 = row
                    .iter()
                    .filter_map(|(col, val)| query_map.get(col).map(|q| q * val))
                    .sum();
                if dot > 0.0 {
                    Some((u32::try_from(id).unwrap_or(u32::MAX), dot))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);
        scored
    }
}

fn build_row(tokens: &[String], vocab: &HashMap<String, u32>, idf: &[f32]) -> SparseRow {
    let mut counts: HashMap<u32, f32> = HashMap::new();
    for tok in tokens {
        if let Some(&col) = vocab.get(tok) {
            *counts.entry(col).or_insert(0.0) += 1.0;
        }
    }
    let mut row: Vec<(u32, f32)> = counts
        .into_iter()
        .map(|(col, tf)| (col, tf * idf.get(col as usize).copied().unwrap_or(0.0)))
        .collect();

    let norm: f32 = row.iter().map(|(_, v)| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for (_, v) in &mut row {
            *v /= norm;
        }
    }
    row.sort_by_key(|(col, _)| *col);
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use crate::corpus::Chunk;

    fn store() -> ChunkStore {
        ChunkStore::new(vec![
            Chunk::new(0, "escala de viaticos nacionales".to_string(), None, BTreeMap::new()),
            Chunk::new(1, "monto maximo diario viaticos S/ 320.00".to_string(), None, BTreeMap::new()),
            Chunk::new(2, "procedimiento administrativo rendicion cuentas".to_string(), None, BTreeMap::new()),
        ])
    }

    #[test]
    fn search_finds_relevant_row() {
        let chunks = store();
        let index = TfidfIndex::build(&chunks);
        let hits = index.search("monto maximo viaticos", 5);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn unknown_query_tokens_yield_empty() {
        let chunks = store();
        let index = TfidfIndex::build(&chunks);
        let hits = index.search("zzzzz qqqqq", 5);
        assert!(hits.is_empty());
    }

    #[test]
    fn empty_query_yields_empty_not_error() {
        let chunks = store();
        let index = TfidfIndex::build(&chunks);
        let hits = index.search("", 5);
        assert!(hits.is_empty());
    }

    #[test]
    fn rows_are_unit_normalized() {
        let chunks = store();
        let index = TfidfIndex::build(&chunks);
        for row in &index.rows {
            let norm: f32 = row.iter().map(|(_, v)| v * v).sum::<f32>().sqrt();
            assert!(row.is_empty() || (norm - 1.0).abs() < 1e-4);
        }
    }
}
