// Resilient access to generative language models: providers, retry, circuit breaking and failover

pub mod circuit_breaker;
pub mod metrics;
pub mod pool;
pub mod providers;
pub mod retry;


use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState};
pub use metrics::{MetricsSnapshot, PoolMetrics};
pub use pool::{HealthSnapshot, LlmPool, ProbeResult, ProviderHealth};
pub use providers::build_provider;
pub use retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_instruction: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A successful completion and where it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: u32,
    #[serde(serialize_with = "serialize_millis")]
    pub latency: Duration,
}

fn serialize_millis<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u128(duration.as_millis())
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("{provider} timed out")]
    Timeout { provider: String },

    #[error("{provider} rate limited the request")]
    RateLimited { provider: String },

    #[error("{provider} is unavailable: {message}")]
    Unavailable { provider: String, message: String },

    #[error("{provider} rejected the request: {message}")]
    Provider { provider: String, message: String },

    #[error("circuit open for {provider}")]
    CircuitOpen { provider: String },

    #[error("all language-model providers exhausted ({})", .failures.join("; "))]
    Exhausted { failures: Vec<String> },
}

impl LlmError {
    /// Timeouts, rate limits and outages are worth retrying; everything else fails fast
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Unavailable { .. }
        )
    }

    /// Stable label used for error counters
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable { .. } => "unavailable",
            Self::Provider { .. } => "provider",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Exhausted { .. } => "exhausted",
        }
    }
}

/// One generative-model backend
#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}
