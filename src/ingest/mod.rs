// Knowledge-base ingestion: validation, deterministic ids, batched embed-and-store


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::embeddings::EmbeddingProvider;
use crate::store::{Document, VectorStore, validate_collection_name};
use crate::{RagError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 50;
const MIN_CONTENT_LENGTH: usize = 10;
const MAX_CONTENT_LENGTH: usize = 10_000;
const ID_KEY_FIELDS: [&str; 4] = ["source", "category", "crop", "scheme_type"];

/// One document as supplied for ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRecord {
    /// Generated from metadata and content when absent
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentRejection {
    #[error("content is empty")]
    EmptyContent,

    #[error("content is too short ({0} characters, minimum 10)")]
    TooShort(usize),

    #[error("content is too long ({0} characters, maximum 10000)")]
    TooLong(usize),

    #[error("metadata has no source")]
    MissingSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionStats {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub ingested_ids: Vec<String>,
    pub collection: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeBaseStats {
    pub total_documents: usize,
    pub collections: BTreeMap<String, usize>,
    pub generated_at: DateTime<Utc>,
}

#[inline]
pub fn validate_document(record: &IngestRecord) -> std::result::Result<(), DocumentRejection> {
    if record.content.is_empty() {
        return Err(DocumentRejection::EmptyContent);
    }

    let trimmed = record.content.trim().chars().count();
    if trimmed < MIN_CONTENT_LENGTH {
        return Err(DocumentRejection::TooShort(trimmed));
    }

    let length = record.content.chars().count();
    if length > MAX_CONTENT_LENGTH {
        return Err(DocumentRejection::TooLong(length));
    }

    let has_source = record
        .metadata
        .get("source")
        .is_some_and(|source| !metadata_text(source).trim().is_empty());
    if !has_source {
        return Err(DocumentRejection::MissingSource);
    }

    Ok(())
}

fn metadata_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `<source>_<category>_<crop>_<scheme_type>_<hash>` over the fields present,
/// or `doc_<hash>` when none are; `hash` is the first 8 hex digits of SHA-256(content)
#[inline]
pub fn generate_document_id(
    content: &str,
    metadata: &BTreeMap<String, serde_json::Value>,
) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let hash: String = format!("{digest:x}").chars().take(8).collect();

    let key = ID_KEY_FIELDS
        .iter()
        .filter_map(|field| metadata.get(*field))
        .map(metadata_text)
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    if key.is_empty() {
        format!("doc_{hash}")
    } else {
        format!("{key}_{hash}")
    }
}

/// Read a JSON array of [`IngestRecord`]s
#[inline]
pub fn load_records(path: &Path) -> Result<Vec<IngestRecord>> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| {
        RagError::Ingestion(format!("Failed to parse {}: {}", path.display(), e))
    })
}

/// Validate, embed and store `records` in batches.
///
/// Invalid records and every record of a batch that fails to embed or store are
/// counted as failed; the run continues with the next batch.
#[inline]
pub async fn ingest_documents(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingProvider,
    collection: &str,
    records: &[IngestRecord],
    batch_size: usize,
) -> Result<IngestionStats> {
    validate_collection_name(collection)?;

    let mut processed = 0;
    let mut failed = 0;
    let mut ingested_ids = Vec::new();

    for (batch_number, batch) in records.chunks(batch_size.max(1)).enumerate() {
        let valid: Vec<&IngestRecord> = batch
            .iter()
            .filter(|record| match validate_document(record) {
                Ok(()) => true,
                Err(rejection) => {
                    warn!("Skipping document: {}", rejection);
                    false
                }
            })
            .collect();
        failed += batch.len() - valid.len();

        if valid.is_empty() {
            continue;
        }

        match store_batch(store, embedder, collection, &valid).await {
            Ok(ids) => {
                debug!("Batch {} stored {} documents", batch_number + 1, ids.len());
                processed += ids.len();
                ingested_ids.extend(ids);
            }
            Err(e) => {
                error!("Failed to process batch {}: {}", batch_number + 1, e);
                failed += valid.len();
            }
        }
    }

    let total = records.len();
    info!(
        "Ingested {}/{} documents into {}",
        processed, total, collection
    );

    Ok(IngestionStats {
        total,
        processed,
        failed,
        success_rate: processed as f64 / total.max(1) as f64,
        ingested_ids,
        collection: collection.to_string(),
        ingested_at: Utc::now(),
    })
}

async fn store_batch(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingProvider,
    collection: &str,
    records: &[&IngestRecord],
) -> Result<Vec<String>> {
    let texts: Vec<String> = records.iter().map(|r| r.content.clone()).collect();
    let embeddings = embedder.embed_batch(&texts).await?;

    if embeddings.len() != records.len() {
        return Err(RagError::Embedding(format!(
            "Expected {} embeddings, got {}",
            records.len(),
            embeddings.len()
        )));
    }

    let documents: Vec<Document> = records
        .iter()
        .zip(embeddings)
        .map(|(record, embedding)| {
            let id = record
                .id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| generate_document_id(&record.content, &record.metadata));
            Document::new(id, record.content.clone(), record.metadata.clone())
                .with_embedding(embedding)
        })
        .collect();

    store.upsert(collection, &documents).await?;
    Ok(documents.into_iter().map(|document| document.id).collect())
}

/// Document counts for every collection in the store
#[inline]
pub async fn knowledge_base_stats(store: &dyn VectorStore) -> Result<KnowledgeBaseStats> {
    let mut collections = BTreeMap::new();
    for name in store.list_collections().await? {
        let count = store.count(&name).await?;
        collections.insert(name, count);
    }

    Ok(KnowledgeBaseStats {
        total_documents: collections.values().sum(),
        collections,
        generated_at: Utc::now(),
    })
}
