//! Chunk Store (C2).
//!
//! An immutable, in-memory collection of retrievable text chunks,
//! constructed once by the index loader (C11) and shared read-only with
//! every index backend and query worker for the life of the process.

use std::collections::BTreeMap;

/// A scalar metadata value. Chunk metadata is free-form but must survive
/// PII sanitization on output, so values stay string-shaped.
pub type MetadataValue = String;

/// A unit of retrievable evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Stable, non-negative id, dense in `[0, N)`.
    pub id: u32,
    /// UTF-8 normalized passage text.
    pub text: String,
    /// Optional short label.
    pub title: Option<String>,
    /// Document id, section, page, date, source fingerprint, etc.
    pub metadata: BTreeMap<String, MetadataValue>,
    /// Precomputed token sequence for BM25, aligned with the text above.
    pub tokens: Vec<String>,
}

impl Chunk {
    /// Builds a chunk, tokenizing `text` with the shared tokenizer.
    #[must_use]
    pub fn new(
        id: u32,
        text: String,
        title: Option<String>,
        metadata: BTreeMap<String, MetadataValue>,
    ) -> Self {
        let tokens = crate::tokenizer::tokenize(&text);
        Self {
            id,
            text,
            title,
            metadata,
            tokens,
        }
    }
}

/// Raised when a chunk id falls outside `[0, N)`.
#[derive(Debug, thiserror::Error)]
#[error("chunk id {0} out of range")]
pub struct IndexOutOfRange(pub u32);

/// Immutable, contiguous, id-indexed collection of chunks.
///
/// Storage is a plain vector indexed by id, not a hash map: ids are dense
/// in `[0, N)` by construction, so a direct index is both simpler and
/// faster than a lookup structure.
#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
}

impl ChunkStore {
    /// Builds a store from chunks already in id order.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `chunks[i].id != i as u32` for any `i`;
    /// the loader is responsible for presenting chunks in id order.
    #[must_use]
    pub fn new(chunks: Vec<Chunk>) -> Self {
        debug_assert!(
            chunks.iter().enumerate().all(|(i, c)| c.id as usize == i),
            "chunk store requires chunks in dense id order"
        );
        Self { chunks }
    }

    /// Fetches a chunk by id.
    ///
    /// # Errors
    ///
    /// Returns [`IndexOutOfRange`] if `id >= len()`.
    pub fn get(&self, id: u32) -> Result<&Chunk, IndexOutOfRange> {
        self.chunks.get(id as usize).ok_or(IndexOutOfRange(id))
    }

    /// Returns the number of chunks, `N`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns whether the store holds no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterates over all chunks in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }
}
