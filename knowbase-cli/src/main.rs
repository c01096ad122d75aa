//! `knowbase`: manage and query a private knowledge base from the terminal.

mod commands;
mod settings;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use knowbase_rag::SimilarityMetric;
use tracing_subscriber::EnvFilter;

use settings::{Overrides, ProviderKind, Settings};

#[derive(Parser, Debug)]
#[command(name = "knowbase", version, about = "Ingest documents into a local vector store and query them")]
struct Cli {
    /// TOML settings file
    #[arg(long, short, global = true, env = "KNOWBASE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the store snapshots
    #[arg(long, global = true, env = "KNOWBASE_STORE_PATH")]
    store_path: Option<PathBuf>,

    /// Embedding dimension of the store
    #[arg(long, global = true, env = "KNOWBASE_DIMENSION")]
    dimension: Option<usize>,

    /// Similarity metric (cosine or inner_product)
    #[arg(long, global = true, env = "KNOWBASE_METRIC", value_parser = parse_metric)]
    metric: Option<SimilarityMetric>,

    /// Chunk size in characters
    #[arg(long, global = true, env = "KNOWBASE_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Characters shared by consecutive chunks
    #[arg(long, global = true, env = "KNOWBASE_CHUNK_OVERLAP")]
    chunk_overlap: Option<usize>,

    /// Embedding provider
    #[arg(long, global = true, env = "KNOWBASE_PROVIDER", value_enum)]
    provider: Option<ProviderKind>,

    /// Embedding model name
    #[arg(long, global = true, env = "KNOWBASE_EMBEDDING_MODEL")]
    model: Option<String>,

    /// Base URL of an OpenAI-compatible embeddings server
    #[arg(long, global = true, env = "KNOWBASE_BASE_URL")]
    base_url: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, chunk, embed and store txt, md or json files (pdf needs a custom text extractor)
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Extra metadata stored with every file, as key=value
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },
    /// Remove a document and all of its chunks
    Delete { document_id: String },
    /// List stored documents, oldest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Retrieve the passages most similar to a question
    Query {
        text: String,
        /// Number of passages to return
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
        /// Drop passages scoring below this
        #[arg(long)]
        min_score: Option<f32>,
        #[arg(long)]
        json: bool,
    },
    /// Show store size and durability state
    Stats,
}

fn parse_metric(s: &str) -> Result<SimilarityMetric, String> {
    match s {
        "cosine" => Ok(SimilarityMetric::Cosine),
        "inner_product" | "inner-product" | "dot" => Ok(SimilarityMetric::InnerProduct),
        other => Err(format!("unknown metric '{other}'; use cosine or inner_product")),
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s.split_once('=').ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "knowbase=debug,knowbase_rag=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load(cli.config.as_deref())?.apply(Overrides {
        store_path: cli.store_path,
        dimension: cli.dimension,
        metric: cli.metric,
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
        provider: cli.provider,
        model: cli.model,
        base_url: cli.base_url,
    });

    match cli.command {
        Command::Ingest { files, meta } => commands::ingest(&settings, &files, meta.into_iter().collect()).await,
        Command::Delete { document_id } => commands::delete(&settings, &document_id).await,
        Command::List { json } => commands::list(&settings, json).await,
        Command::Query { text, top_k, min_score, json } => {
            commands::query(&settings, &text, top_k, min_score, json).await
        }
        Command::Stats => commands::stats(&settings).await,
    }
}
