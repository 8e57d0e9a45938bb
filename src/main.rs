use clap::{Args, Parser, Subcommand};
use grounded_rag::Result;
use grounded_rag::commands::{
    run_ingest, run_query, run_retrieve, show_config, show_health, show_stats,
};
use grounded_rag::config::Config;
use grounded_rag::ingest::DEFAULT_BATCH_SIZE;
use grounded_rag::rag::{RagRequest, ResponseType};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "grounded-rag")]
#[command(about = "Grounded answers from a vector knowledge base with resilient language-model access")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the vector database (default: ~/.grounded-rag)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the knowledge base
    Query(QueryArgs),
    /// Show the documents a question would be answered from
    Retrieve(QueryArgs),
    /// Ingest a JSON array of {id?, content, metadata} records
    Ingest {
        file: PathBuf,
        /// Target collection
        #[arg(long)]
        collection: String,
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Show document counts per collection
    Stats,
    /// Check that each language-model provider answers a tiny request.
    ///
    /// Circuit state and metrics belong to this process only, so they start
    /// closed and zeroed on every run.
    Health {
        /// List the configured providers without sending any request
        #[arg(long)]
        offline: bool,
    },
    /// Show the effective configuration
    Config,
}

#[derive(Args)]
struct QueryArgs {
    query: String,
    /// Collection to search; repeat for several (default: configured collections)
    #[arg(long = "collection")]
    collections: Vec<String>,
    #[arg(long)]
    top_k: Option<usize>,
    /// Minimum similarity score in [0, 1]
    #[arg(long)]
    threshold: Option<f32>,
    #[arg(long, value_enum, default_value_t)]
    response_type: ResponseType,
    /// Answer language code, e.g. "en" or "hi"
    #[arg(long)]
    language: Option<String>,
    /// Overall time budget for the request
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Only use documents whose metadata has `key=value`; repeat for several
    #[arg(long = "filter", value_name = "KEY=VALUE", value_parser = parse_filter)]
    filters: Vec<(String, serde_json::Value)>,
}

/// Numbers and booleans compare as JSON values, anything else as a string
fn parse_filter(raw: &str) -> std::result::Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing metadata key in '{raw}'"));
    }

    let value = match serde_json::from_str::<serde_json::Value>(value) {
        Ok(parsed @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_))) => parsed,
        _ => serde_json::Value::String(value.to_string()),
    };
    Ok((key.to_string(), value))
}

impl QueryArgs {
    fn into_request(self) -> RagRequest {
        let mut request = RagRequest::new(self.query)
            .collections(self.collections)
            .response_type(self.response_type);
        request.top_k = self.top_k;
        request.similarity_threshold = self.threshold;
        request.language = self.language;
        request.timeout = self.timeout_secs.map(Duration::from_secs);
        request.filters = self.filters.into_iter().collect();
        request
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.base_dir {
        Some(dir) => Config::load_from(dir)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Query(args) => {
            run_query(&config, &args.into_request()).await?;
        }
        Commands::Retrieve(args) => {
            run_retrieve(&config, &args.into_request()).await?;
        }
        Commands::Ingest {
            file,
            collection,
            batch_size,
        } => {
            run_ingest(&config, &file, &collection, batch_size).await?;
        }
        Commands::Stats => {
            show_stats(&config).await?;
        }
        Commands::Health { offline } => {
            show_health(&config, !offline).await?;
        }
        Commands::Config => {
            show_config(&config)?;
        }
    }

    Ok(())
}
