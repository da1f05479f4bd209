//! Query binary.
//!
//! Opens (building if needed) the index named by a TOML config and runs
//! queries through the configured ranker. Queries come from `--query`, the
//! `[query-runner] query-path` file, or stdin, one per line. When
//! `query-judgements` is set each query is also evaluated, and MAP and gMAP
//! are printed at the end.
//!
//! ```bash
//! echo "the cat" | cargo run --release --bin lexdisk-search -- config.toml -k 5
//! ```

use clap::Parser;
use lexdisk::eval::{IrEval, QueryId};
use lexdisk::{make_index, make_query_ranker, Config, InvertedIndex, Ranker};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lexdisk-search", version, about = "Run ranked queries against an index")]
struct Args {
    /// Path to the TOML config file
    config: PathBuf,

    /// Number of results per query
    #[arg(short = 'k', long, default_value_t = 10)]
    top_k: usize,

    /// Query text; read from the configured query file or stdin when absent
    #[arg(short, long)]
    query: Option<String>,
}

struct Runner<'a, W: Write> {
    index: &'a InvertedIndex,
    ranker: &'a dyn Ranker,
    eval: Option<IrEval>,
    top_k: usize,
    out: W,
}

impl<W: Write> Runner<'_, W> {
    fn run_query(&mut self, id: QueryId, query: &str) -> Result<(), Box<dyn std::error::Error>> {
        let start = Instant::now();
        let results = self.ranker.rank_text(self.index, query, self.top_k)?;
        debug!(query, results = results.len(), elapsed = ?start.elapsed(), "query done");
        writeln!(self.out, "query {}: {}", id, query)?;
        for (rank, result) in results.iter().enumerate() {
            let label = self.index.label(result.doc_id)?.unwrap_or_default();
            writeln!(
                self.out,
                "{:>3}. {} {:.4} {}",
                rank + 1,
                result.doc_id,
                result.score,
                label
            )?;
        }
        if let Some(eval) = self.eval.as_mut() {
            let stats = eval.evaluate(&results, id, self.top_k);
            writeln!(
                self.out,
                "  NDCG: {:.3}  Avg. P: {:.3}  F1: {:.3}  Precision: {:.3}  Recall: {:.3}",
                stats.ndcg, stats.avg_precision, stats.f1, stats.precision, stats.recall
            )?;
        }
        Ok(())
    }

    fn finish(mut self) -> io::Result<()> {
        if let Some(eval) = &self.eval {
            writeln!(self.out, "  MAP: {:.4}", eval.map())?;
            writeln!(self.out, " gMAP: {:.4}", eval.gmap())?;
        }
        self.out.flush()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    let index = make_index(&config)?;
    let ranker = make_query_ranker(&config, &index)?;
    let eval = match &config.query_runner.query_judgements {
        Some(path) => Some(IrEval::from_file(path)?),
        None => {
            info!("no query judgements configured, skipping evaluation");
            None
        }
    };
    info!(ranker = ranker.id(), docs = index.doc_count(), "ready");

    let stdout = io::stdout();
    let mut runner = Runner {
        index: &index,
        ranker: ranker.as_ref(),
        eval,
        top_k: args.top_k,
        out: BufWriter::new(stdout.lock()),
    };
    let mut id = config.query_runner.query_id_start;
    let start = Instant::now();
    match (&args.query, &config.query_runner.query_path) {
        (Some(query), _) => runner.run_query(id, query)?,
        (None, source) => {
            let input: Box<dyn BufRead> = match source {
                Some(path) => Box::new(BufReader::new(File::open(path)?)),
                None => Box::new(io::stdin().lock()),
            };
            // Ids follow line numbers so they line up with the judgements.
            for line in input.lines() {
                let line = line?;
                if !line.trim().is_empty() {
                    runner.run_query(id, &line)?;
                }
                id += 1;
            }
        }
    }
    runner.finish()?;
    info!(elapsed = ?start.elapsed(), "queries done");
    Ok(())
}
