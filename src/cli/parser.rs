//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros. The CLI is a
//! thin caller over [`crate::orchestrator::Engine`]: it builds a config,
//! loads the artifact bundle, and dispatches one request per invocation.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// MINEDU administrative-regulatory document retrieval engine.
#[derive(Parser, Debug)]
#[command(name = "minedu-retrieval")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding the persisted index artifacts.
    #[arg(long, env = "ARTIFACT_DIR")]
    pub artifact_dir: Option<PathBuf>,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single query through the retrieval pipeline.
    Search {
        /// The query text.
        query: String,

        /// Maximum number of results.
        #[arg(long, default_value = "10")]
        top_k: usize,

        /// Caller identifier, used for rate limiting and audit logging.
        #[arg(long, default_value = "cli")]
        identifier: String,
    },

    /// Validate that the artifact bundle loads, reporting any warnings.
    Load,

    /// Show whether each index is live or degraded.
    Status,

    /// Show corpus and index size statistics.
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
