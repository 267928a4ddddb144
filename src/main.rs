//! # docs-harness CLI
//!
//! Builds the index for a documentation corpus and queries it.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docs-harness build` | Chunk, embed (incrementally), and write the index |
//! | `docs-harness search "<query>"` | Ranked search with filters and cursors |
//! | `docs-harness get <chunk_id>` | A chunk with surrounding context |
//! | `docs-harness files` | Indexed files, optionally filtered |
//! | `docs-harness schema` | Tool descriptors with generated schemas |
//! | `docs-harness call <tool> '<json>'` | Invoke a tool as a protocol host would |
//!
//! ## Examples
//!
//! ```bash
//! docs-harness --config ./docs-harness.toml build
//! docs-harness search "retry policy" --filter language=python
//! docs-harness get "sdk/python/retries.md#retries/retry-policy" --context 1
//! DOCS_HARNESS_LOG=debug docs-harness build --force
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use docs_harness::config;
use docs_harness::ingest::{self, BuildOptions};
use docs_harness::protocol::Dispatcher;
use docs_harness::search::SearchQuery;

/// Manifest-driven documentation indexing and grounded search.
#[derive(Parser)]
#[command(name = "docs-harness", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./docs-harness.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). `DOCS_HARNESS_LOG` wins.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index and corpus metadata.
    ///
    /// Unchanged chunks reuse cached vectors; a rebuild of an unchanged
    /// corpus makes no provider calls.
    Build {
        /// Re-embed every chunk, ignoring the embedding cache.
        #[arg(long)]
        force: bool,
    },

    /// Search the built index.
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Filter as `key=value`; repeatable.
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,

        /// `next_cursor` from a previous page.
        #[arg(long)]
        cursor: Option<String>,

        /// Print the raw JSON response.
        #[arg(long)]
        json: bool,
    },

    /// Retrieve a chunk with surrounding context.
    Get {
        chunk_id: String,

        /// Neighbours on each side; -1 for the whole file.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        context: i64,
    },

    /// List indexed files.
    Files {
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },

    /// Print tool descriptors, including the generated input schemas, as JSON.
    Schema,

    /// Call a tool with JSON arguments and print the JSON result.
    Call {
        tool: String,
        #[arg(default_value = "{}")]
        args: String,
    },
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCS_HARNESS_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build { force } => {
            let report = ingest::run_build(&cfg, &BuildOptions { force }).await?;
            println!("build {}", cfg.corpus.root.display());
            println!("  files: {} ({} unchanged)", report.files, report.unchanged_files);
            println!("  chunks: {}", report.chunks);
            println!("  taxonomy keys: {}", report.taxonomy_keys);
            if let Some(stats) = &report.embedding {
                println!(
                    "  embeddings: {} cached, {} embedded, {} failed",
                    stats.hits,
                    stats.misses - stats.failed,
                    stats.failed
                );
                if let Some(cost) = stats.estimated_cost_usd {
                    println!("  estimated cost: ${:.4} (~{} tokens)", cost, stats.estimated_tokens);
                }
            }
            println!("  index: {}", report.index_path.display());
            println!("ok");
        }
        Commands::Search {
            query,
            limit,
            filters,
            cursor,
            json,
        } => {
            let engine = ingest::load_engine(&cfg).await?;
            let request = SearchQuery {
                query,
                limit,
                filters: filters.into_iter().collect(),
                cursor,
                ..Default::default()
            };
            let response = engine.search(&request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }
            if let Some(hint) = &response.hint {
                println!("{}", hint.message);
                for (key, values) in &hint.suggested_filters {
                    println!("  try {}: {}", key, values.join(", "));
                }
            }
            for (i, hit) in response.hits.iter().enumerate() {
                println!("{}. [{:.4}] {}", i + 1, hit.score, hit.chunk_id);
                println!("    {}", hit.breadcrumb);
                println!("    {}", hit.snippet.replace('\n', " "));
            }
            if let Some(next) = &response.next_cursor {
                println!();
                println!("next cursor: {}", next);
            }
        }
        Commands::Get { chunk_id, context } => {
            let engine = ingest::load_engine(&cfg).await?;
            let doc = engine.get_doc(&chunk_id, context)?;
            println!("{}", doc.text);
        }
        Commands::Files { filters } => {
            let engine = ingest::load_engine(&cfg).await?;
            let filters: BTreeMap<String, String> = filters.into_iter().collect();
            for entry in engine.list_filepaths(&filters)? {
                println!("{}\t{}", entry.filepath, entry.chunk_id);
            }
        }
        Commands::Schema => {
            let dispatcher = Dispatcher::new(Arc::new(ingest::load_engine(&cfg).await?));
            println!("{}", serde_json::to_string_pretty(&dispatcher.list_tools())?);
        }
        Commands::Call { tool, args } => {
            let args: serde_json::Value = match serde_json::from_str(&args) {
                Ok(v) => v,
                Err(e) => bail!("arguments must be a JSON object: {}", e),
            };
            let dispatcher = Dispatcher::new(Arc::new(ingest::load_engine(&cfg).await?));
            match dispatcher.call_tool(&tool, args).await {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(e) => {
                    let body = serde_json::json!({
                        "error": { "code": e.code(), "message": e.to_string() }
                    });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
