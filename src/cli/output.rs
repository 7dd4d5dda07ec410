//! Output formatting for CLI commands.
//!
//! Supports text and JSON output formats.

use std::fmt::Write;

use serde::Serialize;

use crate::index::loader::LoadedIndexes;
use crate::orchestrator::SearchHit;

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output.
    Json,
}

impl OutputFormat {
    /// Parses a format from a string, defaulting to [`Self::Text`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

#[derive(Serialize)]
struct SearchHitView<'a> {
    chunk_id: u32,
    score: f32,
    text: &'a str,
    title: Option<&'a str>,
    methods: &'a [&'static str],
    metadata: &'a std::collections::BTreeMap<String, String>,
    search_variant: &'a str,
    original_query: &'a str,
}

/// Formats the results of a `search` command.
#[must_use]
pub fn format_search_results(hits: &[SearchHit], format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format_search_results_text(hits),
        OutputFormat::Json => format_json(
            &hits
                .iter()
                .map(|h| SearchHitView {
                    chunk_id: h.chunk_id,
                    score: h.score,
                    text: &h.text,
                    title: h.title.as_deref(),
                    methods: &h.methods,
                    metadata: &h.metadata,
                    search_variant: &h.search_variant,
                    original_query: &h.original_query,
                })
                .collect::<Vec<_>>(),
        ),
    }
}

fn format_search_results_text(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No se encontraron resultados.\n".to_string();
    }
    let mut output = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let _ = writeln!(output, "{}. [{}] score={:.3} ({})", i + 1, hit.chunk_id, hit.score, hit.methods.join(","));
        if let Some(title) = &hit.title {
            let _ = writeln!(output, "   {title}");
        }
        let _ = writeln!(output, "   {}", truncate(&hit.text, 200));
    }
    output
}

/// Formats the result of a `load` command.
#[must_use]
pub fn format_load_result(loaded: &LoadedIndexes, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let mut output = String::new();
            let _ = writeln!(output, "Chunks cargados: {}", loaded.chunks.len());
            let _ = writeln!(output, "BM25:   {}", if loaded.bm25.is_some() { "activo" } else { "degradado" });
            let _ = writeln!(output, "TF-IDF: {}", if loaded.tfidf.is_some() { "activo" } else { "degradado" });
            let _ = writeln!(output, "Dense:  {}", if loaded.dense.is_degraded() { "degradado" } else { "activo" });
            for warning in &loaded.warnings {
                let _ = writeln!(output, "advertencia: {warning}");
            }
            output
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "chunk_count": loaded.chunks.len(),
                "bm25_active": loaded.bm25.is_some(),
                "tfidf_active": loaded.tfidf.is_some(),
                "dense_active": !loaded.dense.is_degraded(),
                "warnings": loaded.warnings,
            });
            format_json(&json)
        }
    }
}

/// Formats an error for output. An [`crate::Error::OutOfDomain`] carries a
/// suggestion of in-domain phrasings alongside the stable error kind.
#[must_use]
pub fn format_error(error: &crate::Error, format: OutputFormat) -> String {
    let suggestion = matches!(error, crate::Error::OutOfDomain).then(crate::safety::suggestion_message);
    match format {
        OutputFormat::Text => suggestion.map_or_else(|| error.to_string(), |s| format!("{error}\n{s}")),
        OutputFormat::Json => {
            let json = serde_json::json!({
                "success": false,
                "error": {
                    "kind": error.kind(),
                    "message": error.to_string(),
                    "suggestion": suggestion,
                }
            });
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| "{}".to_string())
        }
    }
}

fn format_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
