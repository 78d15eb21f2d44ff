//! # Knowledge-base control CLI (`kbctl`)
//!
//! Operational trigger for the retrieval engine's lifecycle: initialize
//! or rebuild the indexes, run incremental syncs (typically from cron or
//! a systemd timer), drop everything, and smoke-test queries.
//!
//! ## Usage
//!
//! ```bash
//! kbctl --config ./config/retrieval.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbctl init` | Clear all indexes and rebuild from the full source store |
//! | `kbctl sync` | Incremental sync of records changed since the last pass |
//! | `kbctl drop` | Clear the vector store and keyword index |
//! | `kbctl search "<query>"` | Run a hybrid search (operator smoke test) |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use campus_retrieval::config::load_config;
use campus_retrieval::models::{AccessFilter, AccessLevel};
use campus_retrieval::RetrievalEngine;

/// Retrieval engine operations for the campus knowledge base.
#[derive(Parser)]
#[command(
    name = "kbctl",
    about = "Sync and query the campus knowledge-base retrieval engine",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/retrieval.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full rebuild: clear the vector store and keyword index, then
    /// resync every active record from the source store.
    Init,

    /// Incremental sync of everything changed since the last successful
    /// pass. Safe to re-run; a failed pass retries from the same cutoff.
    Sync,

    /// Clear the vector store and keyword index.
    Drop,

    /// Run a hybrid search and print the results.
    Search {
        /// Query text.
        query: String,

        /// Number of results.
        #[arg(long, default_value_t = 5)]
        limit: usize,

        /// Highest access level to include (lower levels are implied).
        #[arg(long, default_value = "admin")]
        level: String,

        /// Apply the LLM reranking pass to the hybrid candidates.
        #[arg(long)]
        rerank: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let engine = RetrievalEngine::from_config(&config).await?;

    match cli.command {
        Commands::Init => {
            let stats = engine.init_vector_db().await?;
            print_stats("init", &stats);
        }
        Commands::Sync => {
            let stats = engine.sync_from_db().await?;
            print_stats("sync", &stats);
        }
        Commands::Drop => {
            engine.drop_vector_db().await?;
            println!("dropped vector store and keyword index");
        }
        Commands::Search {
            query,
            limit,
            level,
            rerank,
        } => {
            let filter = AccessFilter::up_to(AccessLevel::from_str(&level)?);
            let results = if rerank {
                let candidates = engine
                    .hybrid_search(&query, (limit * 3).max(10), &filter)
                    .await;
                engine.rerank_documents(&query, candidates, limit).await
            } else {
                engine.hybrid_search(&query, limit, &filter).await
            };

            if results.is_empty() {
                println!("no results");
            }
            for (rank, result) in results.iter().enumerate() {
                println!(
                    "{:>2}. [{:.4}] {} #{} ({})",
                    rank + 1,
                    result.score,
                    result.metadata.source_kind,
                    result.metadata.source_id,
                    result.metadata.access_level,
                );
                let excerpt: String = result.content.chars().take(160).collect();
                println!("    {}", excerpt.replace('\n', " "));
            }
        }
    }

    Ok(())
}

fn print_stats(label: &str, stats: &campus_retrieval::SyncStats) {
    println!("{label}");
    println!("  headlines: {}", stats.headlines);
    for (file_type, count) in &stats.documents_by_type {
        println!("  documents ({}): {}", file_type, count);
    }
    println!("  images: {}", stats.images);
    println!("  chunks written: {}", stats.total_chunks);
    if stats.skipped > 0 {
        println!("  skipped records: {}", stats.skipped);
    }
    println!("ok");
}
