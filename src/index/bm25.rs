//! BM25 Index (C3).
//!
//! Lexical scoring over the chunk store using Okapi BM25. The index is
//! immutable after construction; all mutable bookkeeping happens once,
//! at build/load time.

use std::collections::HashMap;

use crate::corpus::ChunkStore;

/// A single `(chunk_id, term_frequency)` posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    /// Chunk id this posting belongs to.
    pub chunk_id: u32,
    /// Raw term frequency of the token within the chunk.
    pub term_frequency: u32,
}

/// Okapi BM25 index over a fixed chunk store.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    chunk_count: u32,
    avg_doc_len: f32,
    doc_lens: Vec<u32>,
    postings: HashMap<String, Vec<Posting>>,
    doc_freq: HashMap<String, u32>,
    k1: f32,
    b: f32,
}

/// OCR-artifact substrings rejected by the quality filter.
const OCR_ARTIFACTS: &[&str] = &["|||", "�", "ﬁ ", "l1l", "___", "..."];

impl Bm25Index {
    /// Builds an index directly from chunk tokens.
    ///
    /// Used both by the offline build pipeline (not part of this crate)
    /// and by the artifact loader, which deserializes the same shape from
    /// disk rather than recomputing it.
    #[must_use]
    pub fn build(chunks: &ChunkStore, k1: f32, b: f32) -> Self {
        let chunk_count = u32::try_from(chunks.len()).unwrap_or(u32::MAX);
        let mut doc_lens = Vec::with_capacity(chunks.len());
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut total_len: u64 = 0;

        for chunk in chunks.iter() {
            let len = u32::try_from(chunk.tokens.len()).unwrap_or(u32::MAX);
            doc_lens.push(len);
            total_len += u64::from(len);

            let mut term_counts: HashMap<&str, u32> = HashMap::new();
            for tok in &chunk.tokens {
                *term_counts.entry(tok.as_str()).or_insert(0) += 1;
            }
            for (term, tf) in term_counts {
                postings.entry(term.to_string()).or_default().push(Posting {
                    chunk_id: chunk.id,
                    term_frequency: tf,
                });
            }
        }

        let doc_freq = postings
            .iter()
            .map(|(term, list)| (term.clone(), u32::try_from(list.len()).unwrap_or(u32::MAX)))
            .collect();

        let avg_doc_len = if chunk_count == 0 {
            0.0
        } else {
            total_len as f32 / chunk_count as f32
        };

        Self {
            chunk_count,
            avg_doc_len,
            doc_lens,
            postings,
            doc_freq,
            k1,
            b,
        }
    }

    /// Constructs an index from already-computed artifact fields, as
    /// produced by [`crate::index::loader`].
    #[must_use]
    pub fn from_parts(
        chunk_count: u32,
        avg_doc_len: f32,
        doc_lens: Vec<u32>,
        postings: HashMap<String, Vec<Posting>>,
        k1: f32,
        b: f32,
    ) -> Self {
        let doc_freq = postings
            .iter()
            .map(|(term, list)| (term.clone(), u32::try_from(list.len()).unwrap_or(u32::MAX)))
            .collect();
        Self {
            chunk_count,
            avg_doc_len,
            doc_lens,
            postings,
            doc_freq,
            k1,
            b,
        }
    }

    /// Scores `query_tokens` against every chunk and returns the top
    /// `top_k` hits, score descending, ties broken by ascending chunk id.
    ///
    /// Unknown query tokens are ignored, not an error. Chunks scoring
    /// `<= 0` are omitted. The quality filter in [`quality_filter`] runs
    /// over the remaining candidates before truncation.
    #[must_use]
    pub fn search(&self, query_tokens: &[String], top_k: usize, chunks: &ChunkStore) -> Vec<(u32, f32)> {
        let mut scores: HashMap<u32, f32> = HashMap::new();

        for token in query_tokens {
            let Some(list) = self.postings.get(token) else {
                continue;
            };
            let df = self.doc_freq.get(token).copied().unwrap_or(0);
            let idf = idf(self.chunk_count, df);

            for posting in list {
                let doc_len = self
                    .doc_lens
                    .get(posting.chunk_id as usize)
                    .copied()
                    .unwrap_or(0) as f32;
                let tf = posting.term_frequency as f32;
                let denom = tf
                    + self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_doc_len.max(1.0));
                let contribution = idf * (tf * (self.k1 + 1.0)) / denom.max(f32::MIN_POSITIVE);
                *scores.entry(posting.chunk_id).or_insert(0.0) += contribution;
            }
        }

        let mut ranked: Vec<(u32, f32)> = scores.into_iter().filter(|(_, s)| *s > 0.0).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));

        quality_filter(ranked, chunks, top_k)
    }

    /// Number of chunks the index was built over.
    #[must_use]
    pub const fn chunk_count(&self) -> u32 {
        self.chunk_count
    }
}

fn idf(n: u32, df: u32) -> f32 {
    let n = f32::from(u16::try_from(n.min(u32::from(u16::MAX))).unwrap_or(u16::MAX));
    let df = f32::from(u16::try_from(df.min(u32::from(u16::MAX))).unwrap_or(u16::MAX));
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// Applies the BM25 quality filter and truncates to `top_k`.
///
/// Rejects a candidate if its text has a non-alphanumeric/non-space ratio
/// above 0.2, a coherent-word ratio below 0.7, or contains any OCR
/// artifact pattern. If every top candidate fails the filter, the single
/// highest-scoring candidate is returned regardless (degenerate-corpus
/// fallback) rather than an empty result.
fn quality_filter(ranked: Vec<(u32, f32)>, chunks: &ChunkStore, top_k: usize) -> Vec<(u32, f32)> {
    let mut kept = Vec::with_capacity(top_k);
    for &(id, score) in &ranked {
        if kept.len() >= top_k {
            break;
        }
        if let Ok(chunk) = chunks.get(id)
            && passes_quality(&chunk.text)
        {
            kept.push((id, score));
        }
    }
    if kept.is_empty()
        && let Some(&best) = ranked.first()
    {
        kept.push(best);
    }
    kept
}

fn passes_quality(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let total = text.chars().count() as f32;
    let non_alnum_space = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count() as f32;
    if non_alnum_space / total > 0.2 {
        return false;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if !words.is_empty() {
        let coherent = words
            .iter()
            .filter(|w| w.chars().count() >= 3 && w.chars().all(char::is_alphabetic))
            .count() as f32;
        if coherent / (words.len() as f32) < 0.7 {
            return false;
        }
    }

    !OCR_ARTIFACTS.iter().any(|pat| text.contains(pat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use crate::corpus::Chunk;

    fn store() -> ChunkStore {
        ChunkStore::new(vec![
            Chunk::new(0, "escala de viaticos nacionales por dia".to_string(), None, BTreeMap::new()),
            Chunk::new(1, "el monto maximo diario para viaticos nacionales es trescientos veinte soles".to_string(), None, BTreeMap::new()),
            Chunk::new(2, "procedimiento administrativo para rendicion de cuentas".to_string(), None, BTreeMap::new()),
        ])
    }

    #[test]
    fn search_ranks_relevant_chunk_first() {
        let chunks = store();
        let index = Bm25Index::build(&chunks, 1.5, 0.75);
        let query = crate::tokenizer::tokenize("monto maximo viaticos");
        let hits = index.search(&query, 5, &chunks);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn unknown_tokens_are_ignored() {
        let chunks = store();
        let index = Bm25Index::build(&chunks, 1.5, 0.75);
        let query = vec!["xyzxyz".to_string()];
        let hits = index.search(&query, 5, &chunks);
        assert!(hits.is_empty());
    }

    #[test]
    fn empty_corpus_returns_empty() {
        let chunks = ChunkStore::new(Vec::new());
        let index = Bm25Index::build(&chunks, 1.5, 0.75);
        let hits = index.search(&["viaticos".to_string()], 5, &chunks);
        assert!(hits.is_empty());
    }

    #[test]
    fn top_k_truncates_and_orders_by_score_desc() {
        let chunks = store();
        let index = Bm25Index::build(&chunks, 1.5, 0.75);
        let query = crate::tokenizer::tokenize("viaticos");
        let hits = index.search(&query, 1, &chunks);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn quality_filter_rejects_ocr_garbage() {
        assert!(!passes_quality("l||a||a||s||d||f"));
        assert!(passes_quality("este texto resulta completamente coherente y normal"));
    }

    #[test]
    fn degenerate_corpus_still_returns_one_hit() {
        let garbage = ChunkStore::new(vec![Chunk::new(
            0,
            "a1 b2 c3 d4 ___ ___".to_string(),
            None,
            BTreeMap::new(),
        )]);
        let index = Bm25Index::build(&garbage, 1.5, 0.75);
        let query = crate::tokenizer::tokenize("a1 b2");
        let hits = index.search(&query, 5, &garbage);
        assert_eq!(hits.len(), 1);
    }
}
