//! Audit Log (C10).
//!
//! Append-only, line-delimited JSON log of every request decision.
//! Identifiers are hashed before they are written; writes are serialized
//! behind a single mutex and flushed line-by-line so the log is durable
//! even if the process is killed mid-request.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{AuditError, Result};

/// The outcome recorded for a single request, matching the closed event
/// kind enumeration of the system this audit log is part of. `Login`,
/// `Logout`, `Download`, `Upload`, and `AdminAction` belong to other
/// parts of that system (session and document-management flows); this
/// read-only retrieval engine only ever emits `Search`, `SecurityAlert`,
/// `AccessDenied`, and `Error`, but the full enumeration is kept closed
/// so audit consumers can rely on the same fixed set regardless of which
/// part of the system wrote a given line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// A session was established. Not emitted by this engine.
    Login,
    /// A session ended. Not emitted by this engine.
    Logout,
    /// A query was served successfully.
    Search,
    /// A document was downloaded. Not emitted by this engine.
    Download,
    /// A document was uploaded. Not emitted by this engine.
    Upload,
    /// An administrative action was taken. Not emitted by this engine.
    AdminAction,
    /// The sanitizer matched a dangerous-instruction, SQL-injection, or
    /// role-change pattern: a probable attack rather than plain rejected
    /// input.
    SecurityAlert,
    /// The request was rejected: invalid input, rate limiting, an IP or
    /// identifier block, or domain gating. The `reason` field on
    /// [`AuditEvent`] distinguishes which.
    AccessDenied,
    /// Unexpected internal fault: index unavailable, timeout, or an
    /// unrecovered error during retrieval or fusion.
    Error,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// SHA-256 hex digest of the caller-supplied identifier.
    pub identifier_hash: String,
    /// What happened.
    pub event: EventKind,
    /// Best-effort query classification, for aggregate reporting only.
    pub query_type: Option<String>,
    /// Number of results returned, when `event` is `Served`.
    pub result_count: Option<usize>,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: u64,
    /// Short machine-readable rejection reason (e.g. `rate_limit`,
    /// `out_of_scope`, `dangerous_instruction`), when `event` is not
    /// `Served`.
    pub reason: Option<&'static str>,
}

/// Coarse query-type buckets used only for aggregate audit reporting;
/// the raw query text is never stored.
const FINANCIAL_TERMS: &[&str] = &["monto", "pago", "viatico", "viático", "tarifa", "presupuesto"];
const PROCEDURAL_TERMS: &[&str] = &["procedimiento", "tramite", "trámite", "requisito", "directiva"];
const RESPONSIBILITY_TERMS: &[&str] = &["responsable", "quien", "quién", "autoriza", "aprueba"];
const TEMPORAL_TERMS: &[&str] = &["plazo", "fecha", "cuando", "cuándo", "vigencia"];
const LOCATION_TERMS: &[&str] = &["lugar", "sede", "region", "región", "provincia"];

/// Classifies `sanitized_query` into a coarse bucket for aggregate audit
/// reporting, without ever persisting the query text itself.
#[must_use]
pub fn classify_query_type(sanitized_query: &str) -> &'static str {
    let lower = sanitized_query.to_lowercase();
    if FINANCIAL_TERMS.iter().any(|t| lower.contains(t)) {
        "financial"
    } else if PROCEDURAL_TERMS.iter().any(|t| lower.contains(t)) {
        "procedural"
    } else if RESPONSIBILITY_TERMS.iter().any(|t| lower.contains(t)) {
        "responsibility"
    } else if TEMPORAL_TERMS.iter().any(|t| lower.contains(t)) {
        "temporal"
    } else if LOCATION_TERMS.iter().any(|t| lower.contains(t)) {
        "location"
    } else {
        "general"
    }
}

/// Hashes a caller-supplied identifier so raw identifiers never reach disk.
#[must_use]
pub fn hash_identifier(identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Append-only audit log writer.
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    /// Opens (creating if necessary) the log file at `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Open`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path).map_err(|e| {
            AuditError::Open { path: path.display().to_string(), reason: e.to_string() }
        })?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    /// Appends `event` as one JSON line, flushing immediately.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Serialize`] if the event cannot be encoded,
    /// or [`AuditError::Write`] if the write or flush fails.
    pub fn append(&self, event: &AuditEvent) -> Result<()> {
        let line = serde_json::to_string(event).map_err(AuditError::from)?;
        let mut file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        writeln!(file, "{line}").map_err(|e| AuditError::Write(e.to_string()))?;
        file.flush().map_err(|e| AuditError::Write(e.to_string()))?;
        Ok(())
    }

    /// The path this log is writing to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
