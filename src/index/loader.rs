//! Index Loader (C11).
//!
//! Validates and loads the persisted artifact bundle into C2-C5. Each
//! artifact is checked for path confinement, size, extension, and
//! integrity before its schema is parsed. Failure to load any single
//! index degrades that index to empty-result mode and is surfaced as a
//! warning rather than an error, as long as at least one index remains
//! functional.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::config::RetrievalConfig;
use crate::corpus::{Chunk, ChunkStore};
use crate::error::{LoaderError, Result};
use crate::index::artifact::{
    self, ALLOWED_EXTENSIONS,
};
use crate::index::bm25::Bm25Index;
use crate::index::dense::{DenseIndex, Encoder};
use crate::index::tfidf::TfidfIndex;

/// Threshold above which artifact files are read via `mmap` rather than
/// a single buffered read.
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Paths to the four persisted artifacts, relative to
/// [`RetrievalConfig::artifact_dir`].
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    /// Chunk-store artifact filename.
    pub chunk_store: PathBuf,
    /// BM25 artifact filename.
    pub bm25: PathBuf,
    /// TF-IDF artifact filename.
    pub tfidf: PathBuf,
    /// Dense artifact filename.
    pub dense: PathBuf,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            chunk_store: PathBuf::from("chunks.bin"),
            bm25: PathBuf::from("bm25.bin"),
            tfidf: PathBuf::from("tfidf.bin"),
            dense: PathBuf::from("dense.bin"),
        }
    }
}

/// The fully-loaded (or degraded) set of in-memory indexes.
pub struct LoadedIndexes {
    /// The chunk store.
    pub chunks: ChunkStore,
    /// The BM25 index, or `None` if it failed to load.
    pub bm25: Option<Bm25Index>,
    /// The TF-IDF index, or `None` if it failed to load.
    pub tfidf: Option<TfidfIndex>,
    /// The dense index; always present, possibly in degraded mode.
    pub dense: DenseIndex,
    /// Non-fatal warnings surfaced during loading.
    pub warnings: Vec<String>,
}

/// Validates that `path` resolves to somewhere inside `base`, has an
/// allowed extension, and is within the configured size limit. Returns
/// the file bytes on success.
fn read_validated(base: &Path, path: &Path, max_size_mb: u64) -> Result<Vec<u8>> {
    let full = base.join(path);
    let canonical_base = base
        .canonicalize()
        .map_err(|e| LoaderError::Io { path: base.display().to_string(), reason: e.to_string() })?;
    let canonical = full
        .canonicalize()
        .map_err(|e| LoaderError::Io { path: full.display().to_string(), reason: e.to_string() })?;
    if !canonical.starts_with(&canonical_base) {
        return Err(LoaderError::PathEscape { path: full.display().to_string() }.into());
    }

    let ext_ok = canonical
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| ALLOWED_EXTENSIONS.contains(&e));
    if !ext_ok {
        return Err(LoaderError::BadExtension { path: full.display().to_string() }.into());
    }

    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| LoaderError::Io { path: full.display().to_string(), reason: e.to_string() })?;
    let max_bytes = max_size_mb * 1024 * 1024;
    if metadata.len() > max_bytes {
        return Err(LoaderError::TooLarge {
            path: full.display().to_string(),
            size: metadata.len(),
            max: max_bytes,
        }
        .into());
    }

    let bytes = if metadata.len() >= MMAP_THRESHOLD {
        let file = std::fs::File::open(&canonical)
            .map_err(|e| LoaderError::Io { path: full.display().to_string(), reason: e.to_string() })?;
        // SAFETY: the artifact file is not expected to be concurrently
        // truncated or modified by another process while the loader runs.
        #[allow(unsafe_code)]
        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| LoaderError::Io { path: full.display().to_string(), reason: e.to_string() })?
        };
        mmap.to_vec()
    } else {
        std::fs::read(&canonical)
            .map_err(|e| LoaderError::Io { path: full.display().to_string(), reason: e.to_string() })?
    };

    Ok(bytes)
}

fn load_chunk_store(config: &RetrievalConfig, path: &Path) -> Result<ChunkStore> {
    let display = path.display().to_string();
    let bytes = read_validated(&config.artifact_dir, path, config.max_file_size_mb)?;
    let payload = artifact::verify_and_strip_trailer(&bytes, &display)?;
    let records = artifact::decode_chunk_store(payload, &display)?;

    let mut sorted = records;
    sorted.sort_by_key(|r| r.id);
    for (i, rec) in sorted.iter().enumerate() {
        if rec.id as usize != i {
            return Err(LoaderError::SchemaInvalid {
                path: display,
                reason: "chunk ids are not dense starting at 0".to_string(),
            }
            .into());
        }
    }

    let chunks = sorted
        .into_iter()
        .map(|r| Chunk::new(r.id, r.text, r.title, r.metadata.into_iter().collect::<BTreeMap<_, _>>()))
        .collect();
    Ok(ChunkStore::new(chunks))
}

fn load_bm25(config: &RetrievalConfig, path: &Path, expected_n: u32) -> std::result::Result<Bm25Index, String> {
    let display = path.display().to_string();
    (|| -> Result<Bm25Index> {
        let bytes = read_validated(&config.artifact_dir, path, config.max_file_size_mb)?;
        let payload = artifact::verify_and_strip_trailer(&bytes, &display)?;
        let art = artifact::decode_bm25(payload, &display)?;
        if art.n != expected_n {
            return Err(LoaderError::SchemaInvalid {
                path: display.clone(),
                reason: "chunk count mismatch with chunk store".to_string(),
            }
            .into());
        }
        Ok(Bm25Index::from_parts(art.n, art.avg_len, art.doc_lens, art.postings, art.k1, art.b))
    })()
    .map_err(|e| format!("{display}: {e}"))
}

fn load_tfidf(config: &RetrievalConfig, path: &Path, expected_n: u32) -> std::result::Result<TfidfIndex, String> {
    let display = path.display().to_string();
    (|| -> Result<TfidfIndex> {
        let bytes = read_validated(&config.artifact_dir, path, config.max_file_size_mb)?;
        let payload = artifact::verify_and_strip_trailer(&bytes, &display)?;
        let art = artifact::decode_tfidf(payload, &display)?;
        if art.rows.len() as u32 != expected_n {
            return Err(LoaderError::SchemaInvalid {
                path: display.clone(),
                reason: "row count mismatch with chunk store".to_string(),
            }
            .into());
        }
        Ok(TfidfIndex::from_parts(art.vocab, art.idf, art.rows))
    })()
    .map_err(|e| format!("{display}: {e}"))
}

fn load_dense(
    config: &RetrievalConfig,
    path: &Path,
    expected_n: u32,
    encoder: Option<Box<dyn Encoder>>,
) -> std::result::Result<DenseIndex, String> {
    let display = path.display().to_string();
    let dims = encoder.as_ref().map_or(0, |e| e.dimensions());
    (|| -> Result<DenseIndex> {
        let bytes = read_validated(&config.artifact_dir, path, config.max_file_size_mb)?;
        let payload = artifact::verify_and_strip_trailer(&bytes, &display)?;
        let art = artifact::decode_dense(payload, &display)?;
        if art.embeddings.len() as u32 != expected_n {
            return Err(LoaderError::SchemaInvalid {
                path: display.clone(),
                reason: "embedding row count mismatch with chunk store".to_string(),
            }
            .into());
        }
        Ok(DenseIndex::new(art.model_name, art.d as usize, art.embeddings, encoder))
    })()
    .map_err(|e| format!("{display}: {e}"))
    // Degrade rather than fail; still useful without a matrix if an
    // encoder was provided but the matrix itself is unavailable.
    .map_err(|e| format!("{e} (degraded to empty-result mode, dims={dims})"))
}

/// Loads all four artifacts named by `paths` under `config.artifact_dir`.
///
/// # Errors
///
/// Returns [`crate::error::Error::IndexUnavailable`] only if the chunk
/// store itself fails to load, or if every index (BM25, TF-IDF, dense)
/// fails — nothing would be retrievable.
pub fn load_all(
    config: &RetrievalConfig,
    paths: &ArtifactPaths,
    encoder: Option<Box<dyn Encoder>>,
) -> Result<LoadedIndexes> {
    let chunks = load_chunk_store(config, &paths.chunk_store)?;
    let n = u32::try_from(chunks.len()).unwrap_or(u32::MAX);

    let mut warnings = Vec::new();

    let bm25 = match load_bm25(config, &paths.bm25, n) {
        Ok(idx) => Some(idx),
        Err(msg) => {
            warnings.push(format!("bm25 index degraded: {msg}"));
            None
        }
    };

    let tfidf = match load_tfidf(config, &paths.tfidf, n) {
        Ok(idx) => Some(idx),
        Err(msg) => {
            warnings.push(format!("tfidf index degraded: {msg}"));
            None
        }
    };

    let dense_dims = encoder.as_ref().map_or(0, |e| e.dimensions());
    let dense = match load_dense(config, &paths.dense, n, encoder) {
        Ok(idx) => idx,
        Err(msg) => {
            warnings.push(format!("dense index degraded: {msg}"));
            DenseIndex::degraded(dense_dims)
        }
    };

    if bm25.is_none() && tfidf.is_none() && dense.is_degraded() {
        return Err(crate::error::Error::IndexUnavailable);
    }

    Ok(LoadedIndexes { chunks, bm25, tfidf, dense, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::artifact::{ChunkRecord, encode_chunk_store};
    use std::collections::HashMap;
    use std::io::Write;

    fn write_artifact(dir: &Path, name: &str, mut payload: Vec<u8>) {
        artifact::append_trailer(&mut payload);
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(&payload).unwrap();
    }

    #[test]
    fn rejects_path_escaping_artifact_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = RetrievalConfig { artifact_dir: dir.path().to_path_buf(), ..Default::default() };
        let result = read_validated(&config.artifact_dir, Path::new("../../etc/passwd"), 100);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_disallowed_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chunks.txt"), b"hello").unwrap();
        let config = RetrievalConfig { artifact_dir: dir.path().to_path_buf(), ..Default::default() };
        let result = read_validated(&config.artifact_dir, Path::new("chunks.txt"), 100);
        assert!(result.is_err());
    }

    #[test]
    fn partial_bundle_degrades_missing_indexes_but_still_loads() {
        use crate::index::artifact::{Bm25Artifact, encode_bm25};

        let dir = tempfile::tempdir().unwrap();
        let records = vec![ChunkRecord {
            id: 0,
            text: "escala de viaticos".to_string(),
            title: None,
            metadata: BTreeMap::new(),
        }];
        write_artifact(dir.path(), "chunks.bin", encode_chunk_store(&records));
        write_artifact(
            dir.path(),
            "bm25.bin",
            encode_bm25(&Bm25Artifact {
                n: 1,
                avg_len: 2.0,
                k1: 1.5,
                b: 0.75,
                doc_lens: vec![2],
                postings: HashMap::new(),
            }),
        );

        let config = RetrievalConfig { artifact_dir: dir.path().to_path_buf(), ..Default::default() };
        let paths = ArtifactPaths::default();
        let loaded = load_all(&config, &paths, None).unwrap();
        assert_eq!(loaded.chunks.len(), 1);
        assert!(loaded.bm25.is_some());
        assert!(loaded.tfidf.is_none());
        assert!(loaded.dense.is_degraded());
        assert_eq!(loaded.warnings.len(), 2);
    }

    #[test]
    fn all_indexes_failing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![ChunkRecord {
            id: 0,
            text: "escala de viaticos".to_string(),
            title: None,
            metadata: BTreeMap::new(),
        }];
        write_artifact(dir.path(), "chunks.bin", encode_chunk_store(&records));

        let config = RetrievalConfig { artifact_dir: dir.path().to_path_buf(), ..Default::default() };
        let paths = ArtifactPaths::default();
        assert!(load_all(&config, &paths, None).is_err());
    }

    #[test]
    fn missing_chunk_store_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = RetrievalConfig { artifact_dir: dir.path().to_path_buf(), ..Default::default() };
        let paths = ArtifactPaths::default();
        assert!(load_all(&config, &paths, None).is_err());
    }
}
