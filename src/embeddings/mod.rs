// Embedding providers used to vectorise documents at ingestion and queries at retrieval

pub mod ollama;


use async_trait::async_trait;

pub use ollama::OllamaEmbedder;

/// A backend that turns text into fixed-width vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>>;

    /// Embed several texts, preserving input order in the output
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;

    fn dims(&self) -> usize;
}

/// Cosine similarity in `[-1.0, 1.0]`, or `0.0` for empty or mismatched vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
