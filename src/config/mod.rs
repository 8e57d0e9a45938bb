// TOML configuration for the embedding endpoint, retrieval, generation and the LLM pool

pub mod settings;


pub use settings::{
    Config, ConfigError, EmbeddingConfig, GenerationConfig, LlmConfig, ProviderConfig,
    ProviderKind, RetrievalConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
