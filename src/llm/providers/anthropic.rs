use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{HttpTransport, endpoint};
use crate::config::ProviderConfig;
use crate::llm::{Completion, CompletionRequest, LanguageModelProvider, LlmError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic `/messages` backend
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    name: String,
    model: String,
    url: String,
    api_key: Option<String>,
    http: HttpTransport,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicProvider {
    #[inline]
    pub fn new(config: &ProviderConfig, api_key: Option<String>) -> Self {
        Self {
            name: config.name.clone(),
            model: config.model.clone(),
            url: endpoint(&config.base_url, "messages"),
            api_key,
            http: HttpTransport::new(&config.name, config.timeout()),
        }
    }
}

#[async_trait]
impl LanguageModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let started = Instant::now();

        let body = MessagesRequest {
            model: &self.model,
            system: &request.system_instruction,
            messages: [UserMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut headers = vec![("anthropic-version", ANTHROPIC_VERSION.to_string())];
        if let Some(key) = &self.api_key {
            headers.push(("x-api-key", key.clone()));
        }

        let response: MessagesResponse =
            self.http.post_json(self.url.clone(), headers, &body).await?;

        let text = response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(self.http.malformed("Response contained no text"));
        }

        Ok(Completion {
            text,
            provider: self.name.clone(),
            model: self.model.clone(),
            tokens_used: response
                .usage
                .map_or(0, |usage| usage.input_tokens + usage.output_tokens),
            latency: started.elapsed(),
        })
    }
}
