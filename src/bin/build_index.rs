//! Index building binary.
//!
//! Reads a TOML config, builds (or reuses) the inverted index described by
//! it and, when `forward-index` is set, the forward index.
//!
//! ```bash
//! cargo run --release --bin lexdisk-index -- config.toml
//! ```

use clap::Parser;
use lexdisk::{make_index, Config, ForwardIndex};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lexdisk-index", version, about = "Build an inverted index from a corpus")]
struct Args {
    /// Path to the TOML config file
    config: PathBuf,

    /// Discard any existing index and rebuild
    #[arg(long)]
    force: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    if args.force && config.index_path.exists() {
        info!(path = %config.index_path.display(), "removing existing index");
        std::fs::remove_dir_all(&config.index_path)?;
    }

    let start = Instant::now();
    let index = make_index(&config)?;
    info!(
        docs = index.doc_count(),
        terms = index.term_count(),
        total_terms = index.total_corpus_terms(),
        avg_doc_length = index.avg_doc_length(),
        elapsed = ?start.elapsed(),
        "inverted index ready"
    );

    if let Some(path) = &config.forward_index {
        if args.force && path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        let start = Instant::now();
        let forward = ForwardIndex::make(&index, path, config.indexer_ram_budget)?;
        info!(
            path = %forward.dir().display(),
            docs = forward.doc_count(),
            elapsed = ?start.elapsed(),
            "forward index ready"
        );
    }
    Ok(())
}
