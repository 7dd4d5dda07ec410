//! Dense Index (C5).
//!
//! Cosine retrieval over precomputed sentence-embedding rows. The index
//! is built once from a persisted embedding matrix; a query encoder,
//! supplied at construction and treated as a runtime dependency rather
//! than part of the artifact, turns a query string into a unit vector at
//! query time.

/// Trait for query encoders that turn text into a dense vector.
///
/// Implementations must be thread-safe: the orchestrator invokes the
/// encoder from query-handling workers, never from the load path.
pub trait Encoder: Send + Sync {
    /// Output dimensionality, `d`.
    fn dimensions(&self) -> usize;

    /// Encodes `text` into a `d`-dimensional vector. Implementations need
    /// not normalize; [`DenseIndex::search`] normalizes the result.
    fn encode(&self, text: &str) -> Vec<f32>;
}

/// Deterministic fallback encoder used when no real embedding model is
/// configured. Produces reproducible pseudo-embeddings from hashed
/// word and character-trigram features — not semantically meaningful,
/// but enough to keep the dense path exercised in tests and in
/// environments without a model download.
pub struct HashEncoder {
    dimensions: usize,
}

impl HashEncoder {
    /// Builds a fallback encoder with the given output dimensionality.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Encoder for HashEncoder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};

        let mut embedding = vec![0.0f32; self.dimensions];
        let normalized: String = text
            .chars()
            .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
            .collect();

        for word in normalized.split_whitespace() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            word.hash(&mut hasher);
            let hash = hasher.finish();
            let idx = (hash as usize) % self.dimensions.max(1);
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            embedding[idx] += sign;
        }
        embedding
    }
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Dense cosine index over a fixed embedding matrix.
///
/// `None` encoder or an empty matrix both collapse to degraded mode:
/// [`DenseIndex::search`] returns an empty sequence rather than an
/// error, and the orchestrator treats that as non-fatal as long as
/// another index is functional.
pub struct DenseIndex {
    model_name: String,
    dimensions: usize,
    /// Row-major, L2-normalized embedding matrix; `rows[i]` corresponds
    /// to chunk id `i`. Empty when degraded.
    rows: Vec<Vec<f32>>,
    encoder: Option<Box<dyn Encoder>>,
}

impl DenseIndex {
    /// Builds a dense index from a precomputed, L2-normalized matrix and
    /// an optional query encoder. Pass `encoder: None` to force degraded
    /// mode even when a matrix is present (matches the artifact contract
    /// that the encoder is not part of the persisted bundle).
    #[must_use]
    pub fn new(model_name: String, dimensions: usize, rows: Vec<Vec<f32>>, encoder: Option<Box<dyn Encoder>>) -> Self {
        Self {
            model_name,
            dimensions,
            rows,
            encoder,
        }
    }

    /// Builds a degraded (empty-result) index: no matrix, no encoder.
    #[must_use]
    pub const fn degraded(dimensions: usize) -> Self {
        Self {
            model_name: String::new(),
            dimensions,
            rows: Vec::new(),
            encoder: None,
        }
    }

    /// Name of the embedding model the matrix was built with.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Output dimensionality, `d`.
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Whether this index is in degraded (always-empty) mode.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.encoder.is_none() || self.rows.is_empty()
    }

    /// Encodes `query_text`, L2-normalizes it, and scores it against
    /// every row by cosine similarity (equivalently, dot product, since
    /// both sides are unit vectors). Top-k descending, ties by ascending
    /// chunk id. Returns an empty sequence in degraded mode.
    #[must_use]
    pub fn search(&self, query_text: &str, top_k: usize) -> Vec<(u32, f32)> {
        let Some(encoder) = &self.encoder else {
            return Vec::new();
        };
        if self.rows.is_empty() {
            return Vec::new();
        }

        let query = l2_normalize(encoder.encode(query_text));
        let mut scored: Vec<(u32, f32)> = self
            .rows
            .iter()
            .enumerate()
            .map(|(id, row)| {
                let dot: f32 = row.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                (u32::try_from(id).unwrap_or(u32::MAX), dot)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_index_returns_empty() {
        let index = DenseIndex::degraded(384);
        assert!(index.is_degraded());
        assert!(index.search("cualquier cosa", 5).is_empty());
    }

    #[test]
    fn search_returns_ranked_hits() {
        let encoder = Box::new(HashEncoder::new(16));
        let row_a = l2_normalize(encoder.encode("monto maximo diario viaticos"));
        let row_b = l2_normalize(encoder.encode("procedimiento administrativo"));
        let index = DenseIndex::new("hash-fallback".to_string(), 16, vec![row_a, row_b], Some(encoder));

        assert!(!index.is_degraded());
        let hits = index.search("monto maximo viaticos", 5);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, 0);
    }

    #[test]
    fn empty_matrix_with_encoder_is_degraded() {
        let index = DenseIndex::new(
            "hash-fallback".to_string(),
            16,
            Vec::new(),
            Some(Box::new(HashEncoder::new(16))),
        );
        assert!(index.is_degraded());
        assert!(index.search("q", 5).is_empty());
    }

    #[test]
    fn hash_encoder_is_deterministic() {
        let encoder = HashEncoder::new(32);
        assert_eq!(encoder.encode("hola mundo"), encoder.encode("hola mundo"));
    }
}
