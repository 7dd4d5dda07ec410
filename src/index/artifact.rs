//! Binary artifact schema (§6).
//!
//! Each persisted artifact is a length-prefixed binary blob: a small
//! fixed-layout header followed by the payload described below, and a
//! trailing SHA-256 digest of everything before it. Encoding here is
//! used only by tests and local fixtures; production artifacts are
//! produced by the offline build pipeline (out of scope for this crate)
//! but must conform to exactly this layout.

use std::collections::{BTreeMap, HashMap};

use sha2::{Digest, Sha256};

use crate::error::LoaderError;
use crate::index::bm25::Posting;

/// File extensions the loader accepts for artifact files.
pub const ALLOWED_EXTENSIONS: &[&str] = &["bin", "idx"];

type DecodeResult<T> = Result<T, LoaderError>;

fn bad_schema(path: &str, reason: impl Into<String>) -> LoaderError {
    LoaderError::SchemaInvalid {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// A byte cursor used to decode artifact payloads without copying.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    path: &'a str,
}

impl<'a> Cursor<'a> {
    const fn new(bytes: &'a [u8], path: &'a str) -> Self {
        Self { bytes, pos: 0, path }
    }

    fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(bad_schema(self.path, "unexpected end of artifact"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> DecodeResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f32(&mut self) -> DecodeResult<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_string(&mut self) -> DecodeResult<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| bad_schema(self.path, "invalid utf-8 in artifact"))
    }

    fn at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_f32(buf: &mut Vec<u8>, v: f32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, u32::try_from(s.len()).unwrap_or(u32::MAX));
    buf.extend_from_slice(s.as_bytes());
}

/// Appends a trailing SHA-256 digest of `buf`'s current contents.
pub fn append_trailer(buf: &mut Vec<u8>) {
    let digest = Sha256::digest(&buf[..]);
    buf.extend_from_slice(&digest);
}

/// Verifies the trailing 32-byte SHA-256 digest and returns the payload
/// with the trailer stripped.
///
/// # Errors
///
/// Returns [`LoaderError::IntegrityCheck`] if the digest does not match.
pub fn verify_and_strip_trailer<'a>(bytes: &'a [u8], path: &str) -> DecodeResult<&'a [u8]> {
    if bytes.len() < 32 {
        return Err(LoaderError::IntegrityCheck { path: path.to_string() });
    }
    let (payload, trailer) = bytes.split_at(bytes.len() - 32);
    let digest = Sha256::digest(payload);
    if digest.as_slice() != trailer {
        return Err(LoaderError::IntegrityCheck { path: path.to_string() });
    }
    Ok(payload)
}

/// A single decoded chunk record, in artifact order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// Chunk id.
    pub id: u32,
    /// Passage text.
    pub text: String,
    /// Optional short label.
    pub title: Option<String>,
    /// Metadata map.
    pub metadata: BTreeMap<String, String>,
}

/// Encodes a chunk-store artifact payload (without the trailer).
#[must_use]
pub fn encode_chunk_store(records: &[ChunkRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u32(&mut buf, u32::try_from(records.len()).unwrap_or(u32::MAX));
    for rec in records {
        write_u32(&mut buf, rec.id);
        write_string(&mut buf, &rec.text);
        write_u32(&mut buf, u32::from(rec.title.is_some()));
        if let Some(title) = &rec.title {
            write_string(&mut buf, title);
        }
        write_u32(&mut buf, u32::try_from(rec.metadata.len()).unwrap_or(u32::MAX));
        for (k, v) in &rec.metadata {
            write_string(&mut buf, k);
            write_string(&mut buf, v);
        }
    }
    buf
}

/// Decodes a chunk-store artifact payload.
pub fn decode_chunk_store(payload: &[u8], path: &str) -> DecodeResult<Vec<ChunkRecord>> {
    let mut cur = Cursor::new(payload, path);
    let n = cur.read_u32()?;
    let mut records = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let id = cur.read_u32()?;
        let text = cur.read_string()?;
        let has_title = cur.read_u32()? != 0;
        let title = if has_title { Some(cur.read_string()?) } else { None };
        let meta_len = cur.read_u32()?;
        let mut metadata = BTreeMap::new();
        for _ in 0..meta_len {
            let k = cur.read_string()?;
            let v = cur.read_string()?;
            metadata.insert(k, v);
        }
        records.push(ChunkRecord { id, text, title, metadata });
    }
    if !cur.at_end() {
        return Err(bad_schema(path, "trailing bytes after chunk records"));
    }
    Ok(records)
}

/// Decoded BM25 artifact fields.
pub struct Bm25Artifact {
    /// Chunk count the index was built over.
    pub n: u32,
    /// Average document length.
    pub avg_len: f32,
    /// BM25 `k1` parameter.
    pub k1: f32,
    /// BM25 `b` parameter.
    pub b: f32,
    /// Per-chunk document length.
    pub doc_lens: Vec<u32>,
    /// Inverted postings, keyed by term.
    pub postings: HashMap<String, Vec<Posting>>,
}

/// Encodes a BM25 artifact payload.
#[must_use]
pub fn encode_bm25(art: &Bm25Artifact) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u32(&mut buf, art.n);
    write_f32(&mut buf, art.avg_len);
    write_f32(&mut buf, art.k1);
    write_f32(&mut buf, art.b);
    write_u32(&mut buf, u32::try_from(art.doc_lens.len()).unwrap_or(u32::MAX));
    for len in &art.doc_lens {
        write_u32(&mut buf, *len);
    }
    write_u32(&mut buf, u32::try_from(art.postings.len()).unwrap_or(u32::MAX));
    for (term, list) in &art.postings {
        write_string(&mut buf, term);
        write_u32(&mut buf, u32::try_from(list.len()).unwrap_or(u32::MAX));
        for posting in list {
            write_u32(&mut buf, posting.chunk_id);
            write_u32(&mut buf, posting.term_frequency);
        }
    }
    buf
}

/// Decodes a BM25 artifact payload.
pub fn decode_bm25(payload: &[u8], path: &str) -> DecodeResult<Bm25Artifact> {
    let mut cur = Cursor::new(payload, path);
    let n = cur.read_u32()?;
    let avg_len = cur.read_f32()?;
    let k1 = cur.read_f32()?;
    let b = cur.read_f32()?;
    let doc_len_count = cur.read_u32()?;
    let mut doc_lens = Vec::with_capacity(doc_len_count as usize);
    for _ in 0..doc_len_count {
        doc_lens.push(cur.read_u32()?);
    }
    if doc_lens.len() as u32 != n {
        return Err(bad_schema(path, "doc_lens length does not match N"));
    }
    let term_count = cur.read_u32()?;
    let mut postings = HashMap::new();
    for _ in 0..term_count {
        let term = cur.read_string()?;
        let list_len = cur.read_u32()?;
        let mut list = Vec::with_capacity(list_len as usize);
        for _ in 0..list_len {
            let chunk_id = cur.read_u32()?;
            let term_frequency = cur.read_u32()?;
            list.push(Posting { chunk_id, term_frequency });
        }
        postings.insert(term, list);
    }
    if !cur.at_end() {
        return Err(bad_schema(path, "trailing bytes after postings"));
    }
    Ok(Bm25Artifact { n, avg_len, k1, b, doc_lens, postings })
}

/// Decoded TF-IDF artifact fields.
pub struct TfidfArtifact {
    /// Vocabulary, token to column index.
    pub vocab: HashMap<String, u32>,
    /// IDF vector, one entry per column.
    pub idf: Vec<f32>,
    /// CSR-style rows, one per chunk.
    pub rows: Vec<Vec<(u32, f32)>>,
}

/// Encodes a TF-IDF artifact payload.
#[must_use]
pub fn encode_tfidf(art: &TfidfArtifact) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u32(&mut buf, u32::try_from(art.vocab.len()).unwrap_or(u32::MAX));
    for (token, col) in &art.vocab {
        write_string(&mut buf, token);
        write_u32(&mut buf, *col);
    }
    write_u32(&mut buf, u32::try_from(art.idf.len()).unwrap_or(u32::MAX));
    for v in &art.idf {
        write_f32(&mut buf, *v);
    }
    write_u32(&mut buf, u32::try_from(art.rows.len()).unwrap_or(u32::MAX));
    for row in &art.rows {
        write_u32(&mut buf, u32::try_from(row.len()).unwrap_or(u32::MAX));
        for (col, val) in row {
            write_u32(&mut buf, *col);
            write_f32(&mut buf, *val);
        }
    }
    buf
}

/// Decodes a TF-IDF artifact payload.
pub fn decode_tfidf(payload: &[u8], path: &str) -> DecodeResult<TfidfArtifact> {
    let mut cur = Cursor::new(payload, path);
    let vocab_len = cur.read_u32()?;
    let mut vocab = HashMap::new();
    for _ in 0..vocab_len {
        let token = cur.read_string()?;
        let col = cur.read_u32()?;
        vocab.insert(token, col);
    }
    let idf_len = cur.read_u32()?;
    let mut idf = Vec::with_capacity(idf_len as usize);
    for _ in 0..idf_len {
        idf.push(cur.read_f32()?);
    }
    let row_count = cur.read_u32()?;
    let mut rows = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let nnz = cur.read_u32()?;
        let mut row = Vec::with_capacity(nnz as usize);
        for _ in 0..nnz {
            let col = cur.read_u32()?;
            let val = cur.read_f32()?;
            row.push((col, val));
        }
        rows.push(row);
    }
    if !cur.at_end() {
        return Err(bad_schema(path, "trailing bytes after tfidf rows"));
    }
    Ok(TfidfArtifact { vocab, idf, rows })
}

/// Decoded dense artifact fields.
pub struct DenseArtifact {
    /// Name of the embedding model the matrix was built with.
    pub model_name: String,
    /// Embedding dimensionality.
    pub d: u32,
    /// Row-major embedding matrix, L2-normalized, one row per chunk.
    pub embeddings: Vec<Vec<f32>>,
}

/// Encodes a dense artifact payload.
#[must_use]
pub fn encode_dense(art: &DenseArtifact) -> Vec<u8> {
    let mut buf = Vec::new();
    write_string(&mut buf, &art.model_name);
    write_u32(&mut buf, art.d);
    write_u32(&mut buf, u32::try_from(art.embeddings.len()).unwrap_or(u32::MAX));
    for row in &art.embeddings {
        for v in row {
            write_f32(&mut buf, *v);
        }
    }
    buf
}

/// Decodes a dense artifact payload.
pub fn decode_dense(payload: &[u8], path: &str) -> DecodeResult<DenseArtifact> {
    let mut cur = Cursor::new(payload, path);
    let model_name = cur.read_string()?;
    let d = cur.read_u32()?;
    let n = cur.read_u32()?;
    let mut embeddings = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let mut row = Vec::with_capacity(d as usize);
        for _ in 0..d {
            row.push(cur.read_f32()?);
        }
        embeddings.push(row);
    }
    if !cur.at_end() {
        return Err(bad_schema(path, "trailing bytes after dense matrix"));
    }
    Ok(DenseArtifact { model_name, d, embeddings })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_store_round_trips() {
        let mut meta = BTreeMap::new();
        meta.insert("date".to_string(), "2024-01-01".to_string());
        let records = vec![ChunkRecord {
            id: 0,
            text: "S/ 320.00 por día".to_string(),
            title: Some("Escala".to_string()),
            metadata: meta,
        }];
        let encoded = encode_chunk_store(&records);
        let decoded = decode_chunk_store(&encoded, "chunks.bin").unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn trailer_round_trips() {
        let mut buf = encode_chunk_store(&[]);
        append_trailer(&mut buf);
        let payload = verify_and_strip_trailer(&buf, "x.bin").unwrap();
        assert!(decode_chunk_store(payload, "x.bin").unwrap().is_empty());
    }

    #[test]
    fn corrupted_trailer_is_rejected() {
        let mut buf = encode_chunk_store(&[]);
        append_trailer(&mut buf);
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(verify_and_strip_trailer(&buf, "x.bin").is_err());
    }

    #[test]
    fn bm25_artifact_round_trips() {
        let mut postings = HashMap::new();
        postings.insert(
            "viaticos".to_string(),
            vec![Posting { chunk_id: 0, term_frequency: 2 }],
        );
        let art = Bm25Artifact {
            n: 1,
            avg_len: 4.0,
            k1: 1.5,
            b: 0.75,
            doc_lens: vec![4],
            postings,
        };
        let encoded = encode_bm25(&art);
        let decoded = decode_bm25(&encoded, "bm25.bin").unwrap();
        assert_eq!(decoded.n, 1);
        assert_eq!(decoded.doc_lens, vec![4]);
        assert_eq!(decoded.postings["viaticos"][0].term_frequency, 2);
    }

    #[test]
    fn dense_artifact_round_trips() {
        let art = DenseArtifact {
            model_name: "hash-fallback".to_string(),
            d: 3,
            embeddings: vec![vec![1.0, 0.0, 0.0]],
        };
        let encoded = encode_dense(&art);
        let decoded = decode_dense(&encoded, "dense.bin").unwrap();
        assert_eq!(decoded.model_name, "hash-fallback");
        assert_eq!(decoded.embeddings, vec![vec![1.0, 0.0, 0.0]]);
    }

    #[test]
    fn truncated_payload_errors_cleanly() {
        let mut buf = encode_chunk_store(&[ChunkRecord {
            id: 0,
            text: "x".to_string(),
            title: None,
            metadata: BTreeMap::new(),
        }]);
        buf.truncate(buf.len() - 2);
        assert!(decode_chunk_store(&buf, "short.bin").is_err());
    }
}
