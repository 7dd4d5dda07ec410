//! Runtime configuration.
//!
//! Tunables recognized by the retrieval engine, with the defaults from
//! the specification. All fields are overridable from the environment so
//! a host process can tune them without a rebuild; [`RetrievalConfig::from_env`]
//! is the constructor the CLI and any other embedder should use.

use std::path::PathBuf;

/// Hard cap on sanitized query length, in characters.
pub const MAX_QUERY_LENGTH: usize = 512;

/// Rejection threshold for artifact loads, in megabytes.
pub const MAX_FILE_SIZE_MB: u64 = 100;

/// Clamp applied to the caller-supplied `top_k`.
pub const MAX_RESULTS_PER_QUERY: usize = 100;

/// Sliding-window rate limit: requests per minute.
pub const REQ_PER_MINUTE: u32 = 30;

/// Sliding-window rate limit: requests per hour.
pub const REQ_PER_HOUR: u32 = 500;

/// Sliding-window rate limit: requests per day.
pub const REQ_PER_DAY: u32 = 2000;

/// Default fusion weight for BM25.
pub const DEFAULT_W_BM25: f32 = 0.4;

/// Default fusion weight for TF-IDF.
pub const DEFAULT_W_TFIDF: f32 = 0.3;

/// Default fusion weight for the dense index.
pub const DEFAULT_W_DENSE: f32 = 0.3;

/// Output dimensionality used by the fallback hash encoder when no real
/// embedding model is configured.
pub const DEFAULT_DENSE_DIMENSIONS: usize = 384;

/// Business hours gate: opening hour (local), inclusive.
pub const DEFAULT_ALLOWED_HOURS_START: u32 = 7;

/// Business hours gate: closing hour (local), exclusive.
pub const DEFAULT_ALLOWED_HOURS_END: u32 = 20;

/// An optional local-hours window during which non-exempt requests are
/// accepted. `None` disables the gate (the default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedHours {
    /// Opening hour, inclusive, 0-23.
    pub start: u32,
    /// Closing hour, exclusive, 0-23.
    pub end: u32,
}

impl AllowedHours {
    /// Returns whether `hour` (0-23, local time) falls inside the window.
    #[must_use]
    pub const fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            // Wrapping window, e.g. 22-06.
            hour >= self.start || hour < self.end
        }
    }
}

/// Fusion weights for combining per-index scores (§4.7 step 2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    /// Weight applied to BM25 scores.
    pub bm25: f32,
    /// Weight applied to TF-IDF scores.
    pub tfidf: f32,
    /// Weight applied to dense scores.
    pub dense: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            bm25: DEFAULT_W_BM25,
            tfidf: DEFAULT_W_TFIDF,
            dense: DEFAULT_W_DENSE,
        }
    }
}

/// All tunables the orchestrator and its collaborators need at construction.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Hard cap on sanitized query length, in characters.
    pub max_query_length: usize,
    /// Rejection threshold for artifact loads, in megabytes.
    pub max_file_size_mb: u64,
    /// Clamp applied to the caller-supplied `top_k`.
    pub max_results_per_query: usize,
    /// Requests-per-minute limit.
    pub req_per_minute: u32,
    /// Requests-per-hour limit.
    pub req_per_hour: u32,
    /// Requests-per-day limit.
    pub req_per_day: u32,
    /// Optional business-hours gate.
    pub allowed_hours: Option<AllowedHours>,
    /// Fusion weights.
    pub fusion_weights: FusionWeights,
    /// Base directory holding persisted index artifacts.
    pub artifact_dir: PathBuf,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_query_length: MAX_QUERY_LENGTH,
            max_file_size_mb: MAX_FILE_SIZE_MB,
            max_results_per_query: MAX_RESULTS_PER_QUERY,
            req_per_minute: REQ_PER_MINUTE,
            req_per_hour: REQ_PER_HOUR,
            req_per_day: REQ_PER_DAY,
            allowed_hours: None,
            fusion_weights: FusionWeights::default(),
            artifact_dir: PathBuf::from("./artifacts"),
        }
    }
}

impl RetrievalConfig {
    /// Builds a configuration from the environment, falling back to
    /// defaults for any variable that is unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_query_length: env_usize("MAX_QUERY_LENGTH", defaults.max_query_length),
            max_file_size_mb: env_u64("MAX_FILE_SIZE_MB", defaults.max_file_size_mb),
            max_results_per_query: env_usize(
                "MAX_RESULTS_PER_QUERY",
                defaults.max_results_per_query,
            ),
            req_per_minute: env_u32("REQ_PER_MINUTE", defaults.req_per_minute),
            req_per_hour: env_u32("REQ_PER_HOUR", defaults.req_per_hour),
            req_per_day: env_u32("REQ_PER_DAY", defaults.req_per_day),
            allowed_hours: env_allowed_hours(),
            fusion_weights: FusionWeights {
                bm25: env_f32("W_BM25", defaults.fusion_weights.bm25),
                tfidf: env_f32("W_TFIDF", defaults.fusion_weights.tfidf),
                dense: env_f32("W_DENSE", defaults.fusion_weights.dense),
            },
            artifact_dir: std::env::var("ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_dir),
        }
    }

    /// Clamps a caller-supplied `top_k` to `[1, max_results_per_query]`.
    #[must_use]
    pub const fn clamp_top_k(&self, top_k: usize) -> usize {
        if top_k == 0 {
            1
        } else if top_k > self.max_results_per_query {
            self.max_results_per_query
        } else {
            top_k
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_allowed_hours() -> Option<AllowedHours> {
    let raw = std::env::var("ALLOWED_HOURS").ok()?;
    let (start, end) = raw.split_once('-')?;
    Some(AllowedHours {
        start: start.trim().parse().ok()?,
        end: end.trim().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = RetrievalConfig::default();
        assert_eq!(cfg.max_query_length, 512);
        assert_eq!(cfg.max_file_size_mb, 100);
        assert_eq!(cfg.max_results_per_query, 100);
        assert_eq!(cfg.req_per_minute, 30);
        assert_eq!(cfg.req_per_hour, 500);
        assert_eq!(cfg.req_per_day, 2000);
        assert_eq!(cfg.fusion_weights.bm25, 0.4);
        assert_eq!(cfg.fusion_weights.tfidf, 0.3);
        assert_eq!(cfg.fusion_weights.dense, 0.3);
    }

    #[test]
    fn clamp_top_k_boundaries() {
        let cfg = RetrievalConfig::default();
        assert_eq!(cfg.clamp_top_k(0), 1);
        assert_eq!(cfg.clamp_top_k(5), 5);
        assert_eq!(cfg.clamp_top_k(1000), 100);
    }

    #[test]
    fn allowed_hours_simple_window() {
        let hours = AllowedHours { start: 7, end: 20 };
        assert!(!hours.contains(6));
        assert!(hours.contains(7));
        assert!(hours.contains(19));
        assert!(!hours.contains(20));
    }

    #[test]
    fn allowed_hours_wrapping_window() {
        let hours = AllowedHours { start: 22, end: 6 };
        assert!(hours.contains(23));
        assert!(hours.contains(0));
        assert!(!hours.contains(12));
    }
}
