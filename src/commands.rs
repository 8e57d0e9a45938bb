use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::embeddings::{EmbeddingProvider, OllamaEmbedder};
use crate::ingest::{ingest_documents, knowledge_base_stats, load_records};
use crate::llm::LlmPool;
use crate::rag::{Orchestrator, RagRequest};
use crate::store::{LanceVectorStore, VectorStore};

const SNIPPET_LENGTH: usize = 120;

struct Backends {
    store: Arc<LanceVectorStore>,
    embedder: Arc<OllamaEmbedder>,
}

async fn open_backends(config: &Config) -> Result<Backends> {
    let embedder = Arc::new(
        OllamaEmbedder::new(&config.embedding).context("Failed to create embedding client")?,
    );
    let store = LanceVectorStore::open(
        &config.vector_database_path(),
        Some(Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>),
    )
    .await
    .context("Failed to open vector store")?;

    Ok(Backends {
        store: Arc::new(store),
        embedder,
    })
}

async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let backends = open_backends(config).await?;
    let pool = Arc::new(LlmPool::from_config(&config.llm));

    Ok(Orchestrator::new(
        backends.store,
        Some(backends.embedder as Arc<dyn EmbeddingProvider>),
        pool,
        config,
    ))
}

/// Answer a question and print the grounded answer as JSON
#[inline]
pub async fn run_query(config: &Config, request: &RagRequest) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let answer = orchestrator.orchestrate(request).await;

    let summary = if answer.is_fallback() {
        style("fallback answer").yellow()
    } else if answer.hallucination_risk {
        style("answer with hallucination risk").red()
    } else {
        style("grounded answer").green()
    };
    eprintln!(
        "{} from {} sources, grounding score {:.2}",
        summary,
        answer.sources.len(),
        answer.grounding_score
    );

    println!(
        "{}",
        serde_json::to_string_pretty(&answer).context("Failed to serialize answer")?
    );
    Ok(())
}

/// Print the ranked candidates for a question without generating an answer
#[inline]
pub async fn run_retrieve(config: &Config, request: &RagRequest) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let candidates = orchestrator.retrieve(request).await;

    if candidates.is_empty() {
        println!("No documents matched the query.");
        return Ok(());
    }

    println!("Retrieved {} candidates:", candidates.len());
    for (rank, candidate) in candidates.iter().enumerate() {
        let record = candidate.source_record();
        println!();
        println!(
            "{} {} (score {:.3})",
            style(format!("[Source {}]", rank + 1)).bold().cyan(),
            record.id,
            record.similarity_score
        );
        println!("   Collection: {}", record.collection);
        println!("   Source: {}, Category: {}", record.source, record.category);
        let snippet: String = candidate
            .document
            .content
            .chars()
            .take(SNIPPET_LENGTH)
            .collect();
        println!("   {}", style(snippet).dim());
    }

    Ok(())
}

/// Ingest a JSON file of documents into a collection
#[inline]
pub async fn run_ingest(
    config: &Config,
    path: &Path,
    collection: &str,
    batch_size: usize,
) -> Result<()> {
    let records = load_records(path)?;
    info!("Loaded {} records from {}", records.len(), path.display());

    let backends = open_backends(config).await?;
    let stats = ingest_documents(
        backends.store.as_ref(),
        backends.embedder.as_ref(),
        collection,
        &records,
        batch_size,
    )
    .await?;

    let headline = format!(
        "Ingested {}/{} documents into '{}'",
        stats.processed, stats.total, stats.collection
    );
    if stats.failed == 0 {
        println!("{}", style(headline).green());
    } else {
        println!("{}", style(headline).yellow());
        println!("  Failed documents: {}", stats.failed);
    }
    println!("  Success rate: {:.1}%", stats.success_rate * 100.0);

    Ok(())
}

/// Print document counts per collection
#[inline]
pub async fn show_stats(config: &Config) -> Result<()> {
    let backends = open_backends(config).await?;
    let stats = knowledge_base_stats(backends.store.as_ref()).await?;

    if stats.collections.is_empty() {
        println!("The knowledge base is empty.");
        println!("Use 'grounded-rag ingest <file> --collection <name>' to add documents.");
        return Ok(());
    }

    println!("Knowledge base ({} documents):", stats.total_documents);
    for (collection, count) in &stats.collections {
        println!("  {}: {}", style(collection).cyan(), count);
    }

    for collection in &config.retrieval.default_collections {
        if backends.store.count(collection).await? == 0 {
            println!(
                "  {}",
                style(format!("Default collection '{collection}' is empty")).yellow()
            );
        }
    }

    Ok(())
}

/// Print provider circuit states and metrics, optionally sending each provider a tiny request
#[inline]
pub async fn show_health(config: &Config, check_providers: bool) -> Result<()> {
    let pool = LlmPool::from_config(&config.llm);

    if check_providers {
        for result in pool.probe_providers().await {
            match (result.healthy, result.latency_ms, result.error) {
                (true, Some(latency), _) => eprintln!(
                    "{} {} responded in {}ms",
                    style("✓").green(),
                    result.provider,
                    latency
                ),
                (_, _, error) => eprintln!(
                    "{} {}: {}",
                    style("✗").red(),
                    result.provider,
                    error.unwrap_or_else(|| "unhealthy".to_string())
                ),
            }
        }
    }

    eprintln!(
        "{}",
        style("Circuit state and metrics cover this process only").dim()
    );
    let snapshot = pool.health_snapshot();
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("Failed to serialize health snapshot")?
    );
    Ok(())
}

/// Print the effective configuration
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding:").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!(
        "  Dimension: {}",
        style(config.embedding.embedding_dimension).cyan()
    );

    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!(
        "  Default collections: {}",
        style(config.retrieval.default_collections.join(", ")).cyan()
    );
    eprintln!(
        "  top_k: {}, threshold: {}",
        style(config.retrieval.top_k).cyan(),
        style(config.retrieval.similarity_threshold).cyan()
    );

    eprintln!("{}", style("Language models:").bold().yellow());
    if config.llm.providers.is_empty() {
        eprintln!("  {}", style("No providers configured").red());
    }
    for provider in &config.llm.providers {
        let key_status = match provider.api_key_env.as_deref() {
            None => style("no key needed".to_string()).dim(),
            Some(var) if std::env::var(var).is_ok_and(|key| !key.is_empty()) => {
                style(format!("{var} set")).green()
            }
            Some(var) => style(format!("{var} missing")).red(),
        };
        eprintln!(
            "  {} ({}, {}) {}",
            style(&provider.name).cyan(),
            provider.model,
            provider.base_url,
            key_status
        );
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    println!(
        "{}",
        toml::to_string_pretty(config).context("Failed to serialize configuration")?
    );
    Ok(())
}
