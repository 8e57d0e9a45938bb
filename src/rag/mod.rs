// Retrieval-augmented generation: retrieve, build context, generate, validate grounding

pub mod context;
pub mod generator;
pub mod grounding;
pub mod orchestrator;
pub mod retriever;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::llm::Completion;
use crate::store::Document;

pub use context::{BuiltContext, ContextBuilder};
pub use generator::{Generation, GroundedGenerator};
pub use grounding::{GroundingReport, GroundingValidator};
pub use orchestrator::{Orchestrator, RagRequest};
pub use retriever::Retriever;

/// A document found for one retrieval call, never persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedCandidate {
    pub document: Document,
    pub similarity_score: f32,
    pub collection: String,
    pub retrieval_query: String,
    pub retrieved_at: DateTime<Utc>,
}

impl RetrievedCandidate {
    #[inline]
    pub fn source_record(&self) -> SourceRecord {
        SourceRecord {
            id: self.document.id.clone(),
            source: self.document.source().unwrap_or("Unknown").to_string(),
            category: self
                .document
                .metadata_str("category")
                .unwrap_or("General")
                .to_string(),
            similarity_score: self.similarity_score,
            collection: self.collection.clone(),
        }
    }
}

/// Provenance of one candidate supplied to the generator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRecord {
    pub id: String,
    pub source: String,
    pub category: String,
    pub similarity_score: f32,
    pub collection: String,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Concise,
    #[default]
    Comprehensive,
    Technical,
}

impl ResponseType {
    /// Key into the configured response-type token table
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Concise => "concise",
            Self::Comprehensive => "comprehensive",
            Self::Technical => "technical",
        }
    }

    #[inline]
    pub fn style_instruction(self) -> &'static str {
        match self {
            Self::Concise => {
                "Provide concise, to-the-point responses focusing on key actionable items."
            }
            Self::Comprehensive => {
                "Provide detailed, comprehensive responses with all relevant information."
            }
            Self::Technical => {
                "Provide technical responses with scientific details and precise measurements."
            }
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Retrieval found nothing above the similarity threshold
    NoRelevantDocuments,
    /// Every language-model provider failed or was unavailable
    GenerationExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fallback { reason: FallbackReason },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderMetadata {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub tokens_used: u32,
    pub latency_ms: u64,
    /// Why generation failed, for operators
    pub error: Option<String>,
}

impl From<&Completion> for ProviderMetadata {
    #[inline]
    fn from(completion: &Completion) -> Self {
        Self {
            provider: Some(completion.provider.clone()),
            model: Some(completion.model.clone()),
            tokens_used: completion.tokens_used,
            latency_ms: u64::try_from(completion.latency.as_millis()).unwrap_or(u64::MAX),
            error: None,
        }
    }
}

/// The engine's answer to one query; every path, including failures, produces one
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundedAnswer {
    pub text: String,
    pub sources: Vec<SourceRecord>,
    pub grounding_score: f32,
    pub is_well_grounded: bool,
    pub hallucination_risk: bool,
    /// Distinct in-range citation numbers found in `text`
    pub citations: Vec<usize>,
    /// Advisory only, see [`GroundingValidator`]
    pub unsupported_claims: Vec<String>,
    pub outcome: Outcome,
    pub provider_metadata: ProviderMetadata,
    pub query: String,
    pub language: String,
    pub response_type: ResponseType,
    pub generated_at: DateTime<Utc>,
}

impl GroundedAnswer {
    #[inline]
    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, Outcome::Fallback { .. })
    }
}
