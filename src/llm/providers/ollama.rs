use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{HttpTransport, endpoint};
use crate::config::ProviderConfig;
use crate::llm::{Completion, CompletionRequest, LanguageModelProvider, LlmError};

/// Local Ollama `/api/chat` backend, no API key
#[derive(Debug, Clone)]
pub struct OllamaChatProvider {
    name: String,
    model: String,
    url: String,
    http: HttpTransport,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaChatProvider {
    #[inline]
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            model: config.model.clone(),
            url: endpoint(&config.base_url, "api/chat"),
            http: HttpTransport::new(&config.name, config.timeout()),
        }
    }
}

#[async_trait]
impl LanguageModelProvider for OllamaChatProvider {
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
            stream: false,
            options: ChatOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
            },
        };

        let response: ChatResponse = self
            .http
            .post_json(self.url.clone(), Vec::new(), &body)
            .await?;

        if response.message.content.trim().is_empty() {
            return Err(self.http.malformed("Response contained no text"));
        }

        Ok(Completion {
            text: response.message.content,
            provider: self.name.clone(),
            model: self.model.clone(),
            tokens_used: response.prompt_eval_count + response.eval_count,
            latency: started.elapsed(),
        })
    }
}
