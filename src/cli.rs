use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "docsync",
    version,
    about = "Keeps project documentation synchronized with source code",
    after_help = r#"Examples:
  docsync scan --repo .
  docsync sync --repo .
  docsync sync --repo . --force
  docsync generate --repo .

Environment:
  DOCSYNC_EMBEDDING_PROVIDER / DOCSYNC_LLM_PROVIDER select AI providers
  (openai|mock|disabled); with none configured every run degrades to the
  deterministic fallback renderer."#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scan the repository and persist the knowledge graph snapshot.
    Scan {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Path to the sqlite snapshot (defaults to <repo>/.docsync/docsync.db).
        #[arg(long)]
        db: Option<PathBuf>,
        /// Documentation output directory (defaults to <repo>/docs).
        #[arg(long)]
        docs: Option<PathBuf>,
    },
    /// Incrementally update the graph and documentation from git changes.
    #[command(alias = "update")]
    Sync {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        docs: Option<PathBuf>,
        /// Run a full resync even when no changes are detected.
        #[arg(long)]
        force: bool,
    },
    /// Generate full documentation from the knowledge graph.
    Generate {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        docs: Option<PathBuf>,
    },
}
