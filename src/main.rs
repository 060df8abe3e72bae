use anyhow::Result;
use clap::Parser;
use docsync::{cli, pipeline};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = cli::Args::parse();
    match args.command {
        cli::Command::Scan { repo, db, docs } => {
            pipeline::Pipeline::new(repo, db, docs).run_scan()
        }
        cli::Command::Sync {
            repo,
            db,
            docs,
            force,
        } => pipeline::Pipeline::new(repo, db, docs).run_sync(force),
        cli::Command::Generate { repo, db, docs } => {
            pipeline::Pipeline::new(repo, db, docs).run_generate()
        }
    }
}
