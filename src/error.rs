//! Error types for the retrieval engine.
//!
//! The caller-visible surface is the closed set of [`Error`] variants;
//! internal failures in individual components are folded into one of
//! these at the orchestrator boundary so nothing beyond a stable kind
//! and message ever reaches a caller.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Caller-visible error kinds.
///
/// This set is closed by design: every rejection path in the pipeline
/// maps onto exactly one of these variants.
#[derive(Error, Debug)]
pub enum Error {
    /// The sanitizer rejected the query outright, or an identifier/`top_k`
    /// was malformed.
    #[error("Consulta no válida")]
    InvalidInput,

    /// Domain pre-check or post-check rejected the query; callers receive
    /// a success-shaped no-information notice, not this variant, but it
    /// is available for callers that want to distinguish the case.
    #[error("fuera de dominio")]
    OutOfDomain,

    /// The rate limiter blocked this identifier.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the identifier is unblocked.
        retry_after_secs: u64,
    },

    /// The identifier or IP address is on a block list.
    #[error("Acceso denegado")]
    Blocked,

    /// All configured indexes failed to load, or none can serve queries.
    #[error("Error en el sistema")]
    IndexUnavailable,

    /// The request deadline elapsed mid-query.
    #[error("timeout")]
    Timeout,

    /// Unexpected internal fault.
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

impl Error {
    /// Returns the stable string code used in audit events and API responses.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::OutOfDomain => "out_of_domain",
            Self::RateLimited { .. } => "rate_limited",
            Self::Blocked => "blocked",
            Self::IndexUnavailable => "index_unavailable",
            Self::Timeout => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}

/// Internal faults not attributable to a safety decision.
#[derive(Error, Debug)]
pub enum InternalError {
    /// Failure while loading a persisted index artifact.
    #[error("artifact load failed: {0}")]
    Artifact(#[from] LoaderError),

    /// Failure while appending to the audit log.
    #[error("audit log failure: {0}")]
    Audit(#[from] AuditError),

    /// Generic I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for InternalError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors raised while loading persisted artifacts (C11).
#[derive(Error, Debug)]
pub enum LoaderError {
    /// The artifact path escapes the configured artifact directory.
    #[error("path escapes artifact directory: {path}")]
    PathEscape {
        /// The offending path.
        path: String,
    },

    /// The artifact file exceeds the configured maximum size.
    #[error("artifact {path} exceeds max size ({size} > {max} bytes)")]
    TooLarge {
        /// The offending path.
        path: String,
        /// Actual size in bytes.
        size: u64,
        /// Maximum allowed size in bytes.
        max: u64,
    },

    /// The artifact's file extension is not in the allowlist.
    #[error("artifact {path} has a disallowed extension")]
    BadExtension {
        /// The offending path.
        path: String,
    },

    /// The trailing SHA-256 digest did not match the artifact's contents.
    #[error("artifact {path} failed integrity check")]
    IntegrityCheck {
        /// The offending path.
        path: String,
    },

    /// The artifact's schema is malformed or inconsistent with its siblings.
    #[error("artifact {path} schema invalid: {reason}")]
    SchemaInvalid {
        /// The offending path.
        path: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Underlying I/O failure while reading an artifact.
    #[error("I/O error reading {path}: {reason}")]
    Io {
        /// The offending path.
        path: String,
        /// Underlying error message.
        reason: String,
    },
}

/// Errors raised by the append-only audit log (C10).
#[derive(Error, Debug)]
pub enum AuditError {
    /// Failed to open or create a log file.
    #[error("failed to open log file {path}: {reason}")]
    Open {
        /// Path to the log file.
        path: String,
        /// Underlying error message.
        reason: String,
    },

    /// Failed to write or flush a log line.
    #[error("failed to write log entry: {0}")]
    Write(String),

    /// Failed to serialize a log entry.
    #[error("failed to serialize log entry: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

impl From<LoaderError> for Error {
    fn from(err: LoaderError) -> Self {
        Self::Internal(InternalError::Artifact(err))
    }
}

impl From<AuditError> for Error {
    fn from(err: AuditError) -> Self {
        Self::Internal(InternalError::Audit(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable() {
        assert_eq!(Error::InvalidInput.kind(), "invalid_input");
        assert_eq!(Error::OutOfDomain.kind(), "out_of_domain");
        assert_eq!(
            Error::RateLimited { retry_after_secs: 5 }.kind(),
            "rate_limited"
        );
        assert_eq!(Error::Blocked.kind(), "blocked");
        assert_eq!(Error::IndexUnavailable.kind(), "index_unavailable");
        assert_eq!(Error::Timeout.kind(), "timeout");
    }

    #[test]
    fn messages_do_not_leak_detail() {
        assert_eq!(Error::InvalidInput.to_string(), "Consulta no válida");
        assert_eq!(Error::Blocked.to_string(), "Acceso denegado");
        assert_eq!(Error::IndexUnavailable.to_string(), "Error en el sistema");
    }

    #[test]
    fn loader_error_from_io() {
        let err = LoaderError::Io {
            path: "chunks.bin".to_string(),
            reason: "not found".to_string(),
        };
        assert!(err.to_string().contains("chunks.bin"));
    }

    #[test]
    fn internal_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: InternalError = io_err.into();
        assert!(matches!(err, InternalError::Io(_)));
    }
}
