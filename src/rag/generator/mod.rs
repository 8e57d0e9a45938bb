
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::{
    BuiltContext, ContextBuilder, FallbackReason, GroundedAnswer, Outcome, ProviderMetadata,
    ResponseType, RetrievedCandidate,
};
use crate::config::GenerationConfig;
use crate::llm::{Completion, CompletionRequest, LlmPool};

const SYSTEM_INSTRUCTION: &str = "You are an expert agricultural advisor for Indian farmers. \
Your role is to provide accurate, practical, and actionable agricultural advice based on the provided context documents.

IMPORTANT GUIDELINES:
1. ONLY use information from the provided context documents
2. ALWAYS cite sources using [Source X] format when making claims
3. If the context doesn't contain enough information, clearly state this limitation
4. Provide specific, actionable advice with dosages, timing, and costs when available
5. Focus on practical solutions that farmers can implement
6. Include prevention strategies when discussing disease/pest management
7. Mention local availability and approximate costs when provided in context";

const NO_DOCUMENTS_EN: &str = "I don't have specific information about your query in my knowledge base. \
Please consult with local agricultural experts or extension officers for accurate guidance.";
const NO_DOCUMENTS_HI: &str = "मेरे पास आपके प्रश्न के बारे में विशिष्ट जानकारी नहीं है। \
कृपया सटीक मार्गदर्शन के लिए स्थानीय कृषि विशेषज्ञों या विस्तार अधिकारियों से सलाह लें।";
const EXHAUSTED_EN: &str = "I'm sorry, I'm unable to generate an answer right now. \
Please try again shortly or consult your local agricultural extension officer.";
const EXHAUSTED_HI: &str = "क्षमा करें, मैं अभी उत्तर तैयार नहीं कर पा रहा हूँ। \
कृपया थोड़ी देर बाद पुनः प्रयास करें या अपने स्थानीय कृषि विस्तार अधिकारी से संपर्क करें।";

/// Result of one generation step
#[derive(Debug)]
pub enum Generation<'a> {
    /// The model answered from `context`; grounding has not been checked yet
    Generated {
        completion: Completion,
        context: BuiltContext<'a>,
    },
    /// A finished answer that needs no further processing
    Fallback(GroundedAnswer),
}

/// Drives the language-model pool with a citation-bearing prompt
pub struct GroundedGenerator {
    pool: Arc<LlmPool>,
    context_builder: ContextBuilder,
    config: GenerationConfig,
}

impl GroundedGenerator {
    #[inline]
    pub fn new(
        pool: Arc<LlmPool>,
        context_builder: ContextBuilder,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            pool,
            context_builder,
            config: config.clone(),
        }
    }

    /// Generate an answer from `candidates`.
    ///
    /// No candidates means no model call: the insufficient-information answer is
    /// returned directly. Pool exhaustion also ends in a fallback answer, with the
    /// failure recorded in its provider metadata.
    #[inline]
    pub async fn generate<'a>(
        &self,
        query: &str,
        candidates: &'a [RetrievedCandidate],
        response_type: ResponseType,
        language: &str,
        deadline: Option<Instant>,
    ) -> Generation<'a> {
        if candidates.is_empty() {
            warn!("No relevant documents for query, answering with fallback");
            return Generation::Fallback(fallback_answer(
                query,
                language,
                response_type,
                FallbackReason::NoRelevantDocuments,
                None,
            ));
        }

        let context = self.context_builder.build(candidates);
        let request = CompletionRequest {
            system_instruction: system_instruction(response_type, language),
            prompt: user_prompt(query, &context.text),
            max_tokens: self.config.max_tokens_for(response_type.as_str()),
            temperature: self.config.temperature,
        };

        debug!(
            "Generating {} answer from {} sources with {} max tokens",
            response_type,
            context.len(),
            request.max_tokens
        );

        match self.pool.generate(&request, deadline).await {
            Ok(completion) => Generation::Generated {
                completion,
                context,
            },
            Err(e) => {
                error!("Generation failed, answering with fallback: {}", e);
                Generation::Fallback(fallback_answer(
                    query,
                    language,
                    response_type,
                    FallbackReason::GenerationExhausted,
                    Some(e.to_string()),
                ))
            }
        }
    }
}

/// Role, grounding rules and response style for the model
#[inline]
pub fn system_instruction(response_type: ResponseType, language: &str) -> String {
    let language_rule = if language == "en" {
        String::new()
    } else {
        format!(
            "\n\nRespond in the language with code '{language}', keeping [Source X] citations unchanged."
        )
    };

    format!(
        "{SYSTEM_INSTRUCTION}\n\nResponse Style: {}{language_rule}",
        response_type.style_instruction()
    )
}

#[inline]
pub fn user_prompt(query: &str, context: &str) -> String {
    format!(
        "Based on the following agricultural knowledge context, please answer the farmer's question.

CONTEXT DOCUMENTS:
{context}

FARMER'S QUESTION: {query}

Please provide a helpful response based ONLY on the information in the context documents above. \
Always cite your sources using [Source X] format."
    )
}

/// Fixed message for a fallback, in Hindi or English
#[inline]
pub fn fallback_message(reason: FallbackReason, language: &str) -> &'static str {
    match (reason, language) {
        (FallbackReason::NoRelevantDocuments, "hi") => NO_DOCUMENTS_HI,
        (FallbackReason::NoRelevantDocuments, _) => NO_DOCUMENTS_EN,
        (FallbackReason::GenerationExhausted, "hi") => EXHAUSTED_HI,
        (FallbackReason::GenerationExhausted, _) => EXHAUSTED_EN,
    }
}

#[inline]
pub fn fallback_answer(
    query: &str,
    language: &str,
    response_type: ResponseType,
    reason: FallbackReason,
    error: Option<String>,
) -> GroundedAnswer {
    GroundedAnswer {
        text: fallback_message(reason, language).to_string(),
        sources: Vec::new(),
        grounding_score: 0.0,
        is_well_grounded: false,
        hallucination_risk: false,
        citations: Vec::new(),
        unsupported_claims: Vec::new(),
        outcome: Outcome::Fallback { reason },
        provider_metadata: ProviderMetadata {
            error,
            ..ProviderMetadata::default()
        },
        query: query.to_string(),
        language: language.to_string(),
        response_type,
        generated_at: Utc::now(),
    }
}
