#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    Document, MetadataFilter, QueryInput, ScoredDocument, VectorStore, validate_collection_name,
};
use crate::embeddings::{EmbeddingProvider, cosine_similarity};
use crate::{RagError, Result};

/// Brute-force cosine search over documents held in memory
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl InMemoryVectorStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables [`QueryInput::Text`] queries
    #[inline]
    pub fn with_embedder(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            collections: RwLock::default(),
            embedder: Some(embedder),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn query(
        &self,
        collection: &str,
        input: QueryInput<'_>,
        filter: &MetadataFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let embedded;
        let query_vector = match input {
            QueryInput::Vector(vector) => vector,
            QueryInput::Text(text) => {
                let embedder = self.embedder.as_ref().ok_or_else(|| {
                    RagError::VectorStore(
                        "Text queries need an embedding provider".to_string(),
                    )
                })?;
                embedded = embedder.embed(text).await?;
                embedded.as_slice()
            }
        };

        let collections = self.collections.read().await;
        let documents = collections.get(collection).ok_or_else(|| {
            RagError::VectorStore(format!("Collection not found: {collection}"))
        })?;

        let mut scored: Vec<ScoredDocument> = documents
            .iter()
            .filter(|document| document.matches(filter))
            .map(|document| ScoredDocument {
                similarity_score: cosine_similarity(query_vector, &document.embedding)
                    .clamp(0.0, 1.0),
                document: document.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        scored.truncate(top_k);

        debug!(
            "In-memory query on '{}' returned {} documents",
            collection,
            scored.len()
        );
        Ok(scored)
    }

    async fn upsert(&self, collection: &str, documents: &[Document]) -> Result<()> {
        validate_collection_name(collection)?;

        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.to_string()).or_default();

        for document in documents {
            match stored.iter_mut().find(|existing| existing.id == document.id) {
                Some(existing) => *existing = document.clone(),
                None => stored.push(document.clone()),
            }
        }

        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(stored) = collections.get_mut(collection) {
            stored.retain(|document| !ids.contains(&document.id));
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
