use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{HttpTransport, endpoint};
use crate::config::ProviderConfig;
use crate::llm::{Completion, CompletionRequest, LanguageModelProvider, LlmError};

/// OpenAI-compatible `/chat/completions` backend
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    name: String,
    model: String,
    url: String,
    api_key: Option<String>,
    http: HttpTransport,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

impl OpenAiProvider {
    #[inline]
    pub fn new(config: &ProviderConfig, api_key: Option<String>) -> Self {
        Self {
            name: config.name.clone(),
            model: config.model.clone(),
            url: endpoint(&config.base_url, "chat/completions"),
            api_key,
            http: HttpTransport::new(&config.name, config.timeout()),
        }
    }
}

#[async_trait]
impl LanguageModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let started = Instant::now();

        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_instruction,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let headers = self
            .api_key
            .iter()
            .map(|key| ("Authorization", format!("Bearer {key}")))
            .collect();

        let response: ChatResponse = self.http.post_json(self.url.clone(), headers, &body).await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| self.http.malformed("Response contained no completion"))?;

        Ok(Completion {
            text,
            provider: self.name.clone(),
            model: self.model.clone(),
            tokens_used: response.usage.map_or(0, |usage| usage.total_tokens),
            latency: started.elapsed(),
        })
    }
}
