
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Ollama endpoint used to embed documents and queries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_secs: 30,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Collections searched when a request names none
    pub default_collections: Vec<String>,
    pub top_k: usize,
    pub similarity_threshold: f32,
    /// Upper bound on a single collection query
    pub query_timeout_secs: u64,
    /// Character budget for the prompt context
    pub max_context_length: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_collections: vec![
                "agricultural_knowledge".to_string(),
                "government_schemes".to_string(),
                "market_intelligence".to_string(),
                "crop_diseases".to_string(),
            ],
            top_k: 5,
            similarity_threshold: 0.3,
            query_timeout_secs: 10,
            max_context_length: 4000,
        }
    }
}

impl RetrievalConfig {
    #[inline]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    /// Token budget for response types missing from `response_tokens`
    pub default_max_tokens: u32,
    pub response_tokens: BTreeMap<String, u32>,
    pub grounding_threshold: f32,
    /// Uncited answers longer than this multiple of the context are flagged
    pub hallucination_length_ratio: f32,
    pub default_language: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            default_max_tokens: 500,
            response_tokens: BTreeMap::from([
                ("concise".to_string(), 150),
                ("comprehensive".to_string(), 800),
                ("technical".to_string(), 600),
            ]),
            grounding_threshold: 0.5,
            hallucination_length_ratio: 2.0,
            default_language: "en".to_string(),
        }
    }
}

impl GenerationConfig {
    #[inline]
    pub fn max_tokens_for(&self, response_type: &str) -> u32 {
        self.response_tokens
            .get(response_type)
            .copied()
            .unwrap_or(self.default_max_tokens)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible `/chat/completions`
    OpenAi,
    /// Anthropic `/messages`
    Anthropic,
    /// Ollama `/api/chat`
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key; providers without one need no key
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_timeout() -> u64 {
    30
}

impl ProviderConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Tried in order: primary first, then each fallback
    pub providers: Vec<ProviderConfig>,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderConfig {
                    name: "openai".to_string(),
                    kind: ProviderKind::OpenAi,
                    base_url: "https://api.openai.com/v1".to_string(),
                    model: "gpt-3.5-turbo".to_string(),
                    api_key_env: Some("OPENAI_API_KEY".to_string()),
                    timeout_secs: default_provider_timeout(),
                },
                ProviderConfig {
                    name: "anthropic".to_string(),
                    kind: ProviderKind::Anthropic,
                    base_url: "https://api.anthropic.com/v1".to_string(),
                    model: "claude-3-haiku-20240307".to_string(),
                    api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
                    timeout_secs: default_provider_timeout(),
                },
            ],
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            failure_threshold: 3,
            cooldown_secs: 300,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid timeout: {0} seconds (must be between 1 and 600)")]
    InvalidTimeout(u64),
    #[error("Invalid retry count: {0} (must be between 1 and 10)")]
    InvalidRetryCount(u32),
    #[error("No default collections configured")]
    NoDefaultCollections,
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid similarity threshold: {0} (must be between 0.0 and 1.0)")]
    InvalidSimilarityThreshold(f32),
    #[error("Invalid max context length: {0} (must be at least 200 characters)")]
    InvalidContextLength(usize),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid token budget for '{0}': {1} (must be between 1 and 8192)")]
    InvalidMaxTokens(String, u32),
    #[error("Invalid grounding threshold: {0} (must be between 0.0 and 1.0)")]
    InvalidGroundingThreshold(f32),
    #[error("Invalid hallucination length ratio: {0} (must be greater than 0)")]
    InvalidLengthRatio(f32),
    #[error("Invalid language code: {0} (cannot be empty)")]
    InvalidLanguage(String),
    #[error("Invalid backoff: base {0}ms, ceiling {1}ms (base must be > 0 and <= ceiling)")]
    InvalidBackoff(u64, u64),
    #[error("Invalid failure threshold: {0} (must be at least 1)")]
    InvalidFailureThreshold(u32),
    #[error("Invalid cool-down: {0} seconds (must be at least 1)")]
    InvalidCooldown(u64),
    #[error("Duplicate provider name: {0}")]
    DuplicateProvider(String),
    #[error("Invalid provider name (cannot be empty)")]
    InvalidProviderName,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Base directory used when none is given (`~/.grounded-rag`)
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".grounded-rag"))
            .or_else(|| dirs::data_dir().map(|data| data.join("grounded-rag")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load from the default base directory
    #[inline]
    pub fn load() -> Result<Self> {
        let config_dir = Self::config_dir().context("Failed to determine config directory")?;
        Self::load_from(config_dir)
    }

    #[inline]
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.embedding.ollama_url()
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.retrieval.validate()?;
        self.generation.validate()?;
        self.llm.validate()?;
        Ok(())
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if !(1..=600).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryCount(self.retry_attempts));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_collections.is_empty()
            || self
                .default_collections
                .iter()
                .any(|name| name.trim().is_empty())
        {
            return Err(ConfigError::NoDefaultCollections);
        }

        if !(1..=100).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidSimilarityThreshold(
                self.similarity_threshold,
            ));
        }

        if !(1..=600).contains(&self.query_timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.query_timeout_secs));
        }

        if self.max_context_length < 200 {
            return Err(ConfigError::InvalidContextLength(self.max_context_length));
        }

        Ok(())
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(1..=8192).contains(&self.default_max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(
                "default".to_string(),
                self.default_max_tokens,
            ));
        }

        for (response_type, tokens) in &self.response_tokens {
            if !(1..=8192).contains(tokens) {
                return Err(ConfigError::InvalidMaxTokens(
                    response_type.clone(),
                    *tokens,
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.grounding_threshold) {
            return Err(ConfigError::InvalidGroundingThreshold(
                self.grounding_threshold,
            ));
        }

        if self.hallucination_length_ratio <= 0.0 {
            return Err(ConfigError::InvalidLengthRatio(
                self.hallucination_length_ratio,
            ));
        }

        if self.default_language.trim().is_empty() {
            return Err(ConfigError::InvalidLanguage(self.default_language.clone()));
        }

        Ok(())
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.max_retries) {
            return Err(ConfigError::InvalidRetryCount(self.max_retries));
        }

        if self.base_delay_ms == 0 || self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::InvalidBackoff(
                self.base_delay_ms,
                self.max_delay_ms,
            ));
        }

        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(self.failure_threshold));
        }

        if self.cooldown_secs == 0 {
            return Err(ConfigError::InvalidCooldown(self.cooldown_secs));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::InvalidProviderName);
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.name.clone()));
            }
            Url::parse(&provider.base_url)
                .map_err(|_| ConfigError::InvalidUrl(provider.base_url.clone()))?;
            if provider.model.trim().is_empty() {
                return Err(ConfigError::InvalidModel(provider.model.clone()));
            }
            if !(1..=600).contains(&provider.timeout_secs) {
                return Err(ConfigError::InvalidTimeout(provider.timeout_secs));
            }
        }

        Ok(())
    }

    #[inline]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}
