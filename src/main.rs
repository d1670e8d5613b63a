//! `ragd` — the RAG Harness command-line interface and server binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rag_harness::config::{load_config, Config};
use rag_harness::ingest::SourceFile;
use rag_harness::server::{run_server, AppState};

/// Tag-partitioned RAG knowledge service.
#[derive(Parser)]
#[command(name = "ragd", version, about)]
struct Cli {
    /// Path to the TOML config file. Defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve,
    /// List registered knowledge tags
    Tags,
    /// Index local files under a knowledge tag
    Upload {
        /// Knowledge tag to file the documents under
        tag: String,
        /// Files to index
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Clone a git repository and index its files
    Analyze {
        /// Repository URL (the tag is derived from its last path segment)
        repo_url: String,
    },
    /// Remove a knowledge tag and everything indexed under it
    DeleteTag {
        /// Tag to remove
        tag: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Serve => {
            let state = AppState::from_config(&config).await?;
            run_server(&config.server.bind, state).await
        }
        Commands::Tags => {
            let state = AppState::from_config(&config).await?;
            for tag in state.registry.list().await? {
                println!("{tag}");
            }
            Ok(())
        }
        Commands::Upload { tag, files } => {
            let state = AppState::from_config(&config).await?;
            let mut sources = Vec::with_capacity(files.len());
            for path in files {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                sources.push(SourceFile { filename, bytes });
            }
            let report = state.pipeline.ingest(&tag, sources).await?;
            println!(
                "Indexed {} chunks from {} files under '{}'",
                report.chunk_count, report.files_processed, tag
            );
            Ok(())
        }
        Commands::Analyze { repo_url } => {
            let state = AppState::from_config(&config).await?;
            let report = state.pipeline.ingest_repository(&repo_url).await?;
            println!(
                "Indexed {} chunks from {} files",
                report.chunk_count, report.files_processed
            );
            Ok(())
        }
        Commands::DeleteTag { tag } => {
            let state = AppState::from_config(&config).await?;
            let removed = state.pipeline.delete_tag(&tag).await?;
            println!("Removed {removed} chunks under '{tag}'");
            Ok(())
        }
    }
}
