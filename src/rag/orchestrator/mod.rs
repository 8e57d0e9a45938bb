
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use super::generator::fallback_answer;
use super::{
    ContextBuilder, FallbackReason, Generation, GroundedAnswer, GroundedGenerator,
    GroundingValidator, Outcome, ProviderMetadata, ResponseType, RetrievedCandidate, Retriever,
};
use crate::config::Config;
use crate::embeddings::EmbeddingProvider;
use crate::llm::{HealthSnapshot, LlmPool};
use crate::store::{MetadataFilter, VectorStore};

/// One question for the engine; unset fields take configured defaults
#[derive(Debug, Clone, PartialEq)]
pub struct RagRequest {
    pub query: String,
    /// Empty means the configured default collections
    pub collections: Vec<String>,
    /// Only documents whose metadata holds every one of these values
    pub filters: MetadataFilter,
    pub top_k: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub response_type: ResponseType,
    pub language: Option<String>,
    /// Overall budget for retrieval and generation
    pub timeout: Option<Duration>,
}

impl RagRequest {
    #[inline]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            collections: Vec::new(),
            filters: MetadataFilter::new(),
            top_k: None,
            similarity_threshold: None,
            response_type: ResponseType::default(),
            language: None,
            timeout: None,
        }
    }

    #[inline]
    pub fn collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    /// Require metadata `key` to equal `value`; repeated keys keep the last value
    #[inline]
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    #[inline]
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    #[inline]
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    #[inline]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    #[inline]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Entry point composing retrieval, context building, generation and grounding validation.
///
/// Holds no per-request state; concurrent calls share only the language-model pool.
pub struct Orchestrator {
    retriever: Retriever,
    generator: GroundedGenerator,
    validator: GroundingValidator,
    pool: Arc<LlmPool>,
    top_k: usize,
    similarity_threshold: f32,
    default_language: String,
}

impl Orchestrator {
    #[inline]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        pool: Arc<LlmPool>,
        config: &Config,
    ) -> Self {
        let context_builder = ContextBuilder::new(config.retrieval.max_context_length);

        Self {
            retriever: Retriever::new(store, embedder, &config.retrieval),
            generator: GroundedGenerator::new(
                Arc::clone(&pool),
                context_builder,
                &config.generation,
            ),
            validator: GroundingValidator::from(&config.generation),
            pool,
            top_k: config.retrieval.top_k,
            similarity_threshold: config.retrieval.similarity_threshold,
            default_language: config.generation.default_language.clone(),
        }
    }

    /// Answer `request`. Every failure ends in a fallback answer, never an error.
    #[inline]
    pub async fn orchestrate(&self, request: &RagRequest) -> GroundedAnswer {
        let deadline = request.timeout.map(|timeout| Instant::now() + timeout);
        let language = request
            .language
            .as_deref()
            .unwrap_or(&self.default_language);

        if request.query.trim().is_empty() {
            warn!("Empty query, answering with fallback");
            return fallback_answer(
                &request.query,
                language,
                request.response_type,
                FallbackReason::NoRelevantDocuments,
                None,
            );
        }

        let candidates = self.retrieve_until(request, deadline).await;

        let generation = self
            .generator
            .generate(
                &request.query,
                &candidates,
                request.response_type,
                language,
                deadline,
            )
            .await;

        let (completion, context) = match generation {
            Generation::Generated {
                completion,
                context,
            } => (completion, context),
            Generation::Fallback(answer) => return answer,
        };

        let report = self.validator.validate(&completion.text, context.cited);
        if report.hallucination_risk {
            warn!(
                provider = %completion.provider,
                score = report.grounding_score,
                "Answer may contain unsupported content"
            );
        } else {
            info!(
                sources = context.len(),
                citations = report.citations.len(),
                score = report.grounding_score,
                "Grounded answer generated"
            );
        }

        let provider_metadata = ProviderMetadata::from(&completion);
        GroundedAnswer {
            text: completion.text,
            sources: context.source_records(),
            grounding_score: report.grounding_score,
            is_well_grounded: report.is_well_grounded,
            hallucination_risk: report.hallucination_risk,
            citations: report.citations,
            unsupported_claims: report.unsupported_claims,
            outcome: Outcome::Success,
            provider_metadata,
            query: request.query.clone(),
            language: language.to_string(),
            response_type: request.response_type,
            generated_at: chrono::Utc::now(),
        }
    }

    /// Retrieval step alone, with the request's defaults applied
    #[inline]
    pub async fn retrieve(&self, request: &RagRequest) -> Vec<RetrievedCandidate> {
        let deadline = request.timeout.map(|timeout| Instant::now() + timeout);
        self.retrieve_until(request, deadline).await
    }

    async fn retrieve_until(
        &self,
        request: &RagRequest,
        deadline: Option<Instant>,
    ) -> Vec<RetrievedCandidate> {
        self.retriever
            .retrieve(
                &request.query,
                &request.collections,
                &request.filters,
                request.top_k.unwrap_or(self.top_k),
                request
                    .similarity_threshold
                    .unwrap_or(self.similarity_threshold),
                deadline,
            )
            .await
    }

    #[inline]
    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.pool.health_snapshot()
    }

    #[inline]
    pub fn pool(&self) -> &LlmPool {
        &self.pool
    }
}
