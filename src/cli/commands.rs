//! Command dispatch.
//!
//! Translates a parsed [`Cli`] into one call against the retrieval
//! engine, building a fresh [`crate::config::RetrievalConfig`] and
//! loading the artifact bundle for each invocation.

use crate::cli::output::{self, OutputFormat};
use crate::cli::{Cli, Commands};
use crate::config::{DEFAULT_DENSE_DIMENSIONS, RetrievalConfig};
use crate::error::Result;
use crate::index::HashEncoder;
use crate::index::loader::{self, ArtifactPaths};
use crate::orchestrator::Engine;

fn fallback_encoder() -> Option<Box<dyn crate::index::Encoder>> {
    Some(Box::new(HashEncoder::new(DEFAULT_DENSE_DIMENSIONS)))
}

/// Executes `cli`, returning the formatted output string.
///
/// # Errors
///
/// Returns whatever error the underlying pipeline stage produced.
pub fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);
    let mut config = RetrievalConfig::from_env();
    if let Some(dir) = &cli.artifact_dir {
        config.artifact_dir = dir.clone();
    }

    match &cli.command {
        Commands::Load | Commands::Status => {
            let loaded = loader::load_all(&config, &ArtifactPaths::default(), fallback_encoder())?;
            Ok(output::format_load_result(&loaded, format))
        }
        Commands::Stats => {
            let loaded = loader::load_all(&config, &ArtifactPaths::default(), fallback_encoder())?;
            match format {
                OutputFormat::Text => Ok(format!("Chunks: {}\n", loaded.chunks.len())),
                OutputFormat::Json => {
                    let json = serde_json::json!({
                        "chunk_count": loaded.chunks.len(),
                        "artifact_dir": config.artifact_dir.display().to_string(),
                    });
                    Ok(serde_json::to_string_pretty(&json).unwrap_or_else(|_| "{}".to_string()))
                }
            }
        }
        Commands::Search { query, top_k, identifier } => {
            let loaded = loader::load_all(&config, &ArtifactPaths::default(), fallback_encoder())?;
            let audit_path = config.artifact_dir.join("audit.jsonl");
            let engine = Engine::new(config, loaded.chunks, loaded.bm25, loaded.tfidf, loaded.dense, audit_path)?;
            let hits = engine.search(identifier, query, *top_k)?;
            Ok(output::format_search_results(&hits, format))
        }
    }
}
