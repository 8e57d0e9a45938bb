#[cfg(test)]
mod tests;

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::RetrievedCandidate;
use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingProvider;
use crate::store::{MetadataFilter, QueryInput, ScoredDocument, VectorStore};

/// Multi-collection semantic search merged into one ranked candidate list
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    default_collections: Vec<String>,
    query_timeout: Duration,
}

impl Retriever {
    /// Without an embedder, queries are sent to the store as text
    #[inline]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            default_collections: config.default_collections.clone(),
            query_timeout: config.query_timeout(),
        }
    }

    #[inline]
    pub fn default_collections(&self) -> &[String] {
        &self.default_collections
    }

    /// Up to `top_k` candidates matching `filter` and scoring at least
    /// `similarity_threshold`, best first.
    ///
    /// Collections are queried concurrently; one that fails or overruns its timeout
    /// contributes nothing. An empty result is a valid outcome, not an error.
    #[inline]
    pub async fn retrieve(
        &self,
        query: &str,
        collections: &[String],
        filter: &MetadataFilter,
        top_k: usize,
        similarity_threshold: f32,
        deadline: Option<Instant>,
    ) -> Vec<RetrievedCandidate> {
        if top_k == 0 {
            debug!("top_k is zero, skipping retrieval");
            return Vec::new();
        }
        if !filter.is_empty() {
            debug!("Restricting retrieval to metadata {:?}", filter);
        }

        let threshold = if similarity_threshold.is_nan() {
            0.0
        } else {
            similarity_threshold.clamp(0.0, 1.0)
        };

        let requested = if collections.is_empty() {
            &self.default_collections
        } else {
            collections
        };
        let mut targets: Vec<&str> = Vec::with_capacity(requested.len());
        for collection in requested {
            if !targets.contains(&collection.as_str()) {
                targets.push(collection);
            }
        }

        let Some(budget) = self.call_budget(deadline) else {
            warn!("Deadline passed before retrieval started");
            return Vec::new();
        };

        let embedded = match &self.embedder {
            Some(embedder) => match tokio::time::timeout(budget, embedder.embed(query)).await {
                Ok(Ok(vector)) => Some(vector),
                Ok(Err(e)) => {
                    warn!("Failed to embed query, no candidates retrieved: {}", e);
                    return Vec::new();
                }
                Err(_) => {
                    warn!("Query embedding timed out after {:?}", budget);
                    return Vec::new();
                }
            },
            None => None,
        };
        let input = embedded
            .as_deref()
            .map_or(QueryInput::Text(query), QueryInput::Vector);

        let Some(budget) = self.call_budget(deadline) else {
            warn!("Deadline passed before collections were queried");
            return Vec::new();
        };

        let lookups = targets
            .iter()
            .map(|collection| self.query_collection(collection, input, filter, top_k, budget));
        let per_collection = join_all(lookups).await;

        let retrieved_at = Utc::now();
        let mut candidates: Vec<RetrievedCandidate> = targets
            .iter()
            .zip(per_collection)
            .flat_map(|(collection, results)| {
                results
                    .into_iter()
                    .filter(move |scored| scored.similarity_score >= threshold)
                    .map(move |scored| RetrievedCandidate {
                        document: scored.document,
                        similarity_score: scored.similarity_score,
                        collection: (*collection).to_string(),
                        retrieval_query: query.to_string(),
                        retrieved_at,
                    })
            })
            .collect();

        // stable: ties keep collection order, then in-collection rank
        candidates.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        candidates.truncate(top_k);

        info!(
            "Retrieved {} candidates from {} collections",
            candidates.len(),
            targets.len()
        );
        candidates
    }

    fn call_budget(&self, deadline: Option<Instant>) -> Option<Duration> {
        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                (!remaining.is_zero()).then(|| remaining.min(self.query_timeout))
            }
            None => Some(self.query_timeout),
        }
    }

    async fn query_collection(
        &self,
        collection: &str,
        input: QueryInput<'_>,
        filter: &MetadataFilter,
        top_k: usize,
        budget: Duration,
    ) -> Vec<ScoredDocument> {
        let lookup = self.store.query(collection, input, filter, top_k);
        match tokio::time::timeout(budget, lookup).await {
            Ok(Ok(results)) => {
                debug!("Collection '{}' returned {} results", collection, results.len());
                results
            }
            Ok(Err(e)) => {
                warn!("Query on collection '{}' failed: {}", collection, e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Query on collection '{}' timed out after {:?}",
                    collection, budget
                );
                Vec::new()
            }
        }
    }
}
