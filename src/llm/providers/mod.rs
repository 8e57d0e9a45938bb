
mod anthropic;
mod ollama;
mod openai;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaChatProvider;
pub use openai::OpenAiProvider;

use super::{LanguageModelProvider, LlmError};
use crate::config::{ProviderConfig, ProviderKind};

/// Build the configured backend, or `None` when its API key variable is unset
#[inline]
pub fn build_provider(config: &ProviderConfig) -> Option<Arc<dyn LanguageModelProvider>> {
    let api_key = match &config.api_key_env {
        Some(var) => match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Some(key),
            _ => {
                warn!(
                    "Skipping provider '{}': environment variable {} is not set",
                    config.name, var
                );
                return None;
            }
        },
        None => None,
    };

    debug!(
        "Configured {:?} provider '{}' with model {}",
        config.kind, config.name, config.model
    );

    Some(match config.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config, api_key)),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config, api_key)),
        ProviderKind::Ollama => Arc::new(OllamaChatProvider::new(config)),
    })
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Map a ureq failure onto the retry taxonomy
fn classify(provider: &str, error: &ureq::Error) -> LlmError {
    let provider = provider.to_string();
    match error {
        ureq::Error::StatusCode(429) => LlmError::RateLimited { provider },
        ureq::Error::StatusCode(408 | 504) | ureq::Error::Timeout(_) => {
            LlmError::Timeout { provider }
        }
        ureq::Error::StatusCode(status) if *status >= 500 => LlmError::Unavailable {
            provider,
            message: format!("HTTP {status}"),
        },
        ureq::Error::StatusCode(status) => LlmError::Provider {
            provider,
            message: format!("HTTP {status}"),
        },
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound | ureq::Error::Io(_) => {
            LlmError::Unavailable {
                provider,
                message: error.to_string(),
            }
        }
        other => LlmError::Provider {
            provider,
            message: other.to_string(),
        },
    }
}

/// Blocking JSON-over-HTTP client shared by the provider implementations
#[derive(Debug, Clone)]
struct HttpTransport {
    provider: String,
    agent: ureq::Agent,
}

impl HttpTransport {
    fn new(provider: &str, timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            provider: provider.to_string(),
            agent,
        }
    }

    fn malformed(&self, message: impl Into<String>) -> LlmError {
        LlmError::Provider {
            provider: self.provider.clone(),
            message: message.into(),
        }
    }

    async fn post_json<T>(
        &self,
        url: String,
        headers: Vec<(&'static str, String)>,
        body: &impl Serialize,
    ) -> Result<T, LlmError>
    where
        T: DeserializeOwned,
    {
        let payload = serde_json::to_string(body)
            .map_err(|e| self.malformed(format!("Failed to serialize request: {e}")))?;
        let agent = self.agent.clone();

        debug!("POST {} via {}", url, self.provider);

        let response_text = tokio::task::spawn_blocking(move || {
            let mut request = agent
                .post(url.as_str())
                .header("Content-Type", "application/json");
            for (name, value) in &headers {
                request = request.header(*name, value.as_str());
            }
            request
                .send(&payload)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .await
        .map_err(|e| LlmError::Unavailable {
            provider: self.provider.clone(),
            message: format!("Request task failed: {e}"),
        })?
        .map_err(|e| classify(&self.provider, &e))?;

        serde_json::from_str(&response_text)
            .map_err(|e| self.malformed(format!("Malformed response: {e}")))
    }
}
