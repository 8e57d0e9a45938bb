// Collection-partitioned document storage with nearest-neighbour search

pub mod lancedb;
pub mod memory;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use self::lancedb::LanceVectorStore;
pub use memory::InMemoryVectorStore;

/// A retrievable unit of knowledge, owned by exactly one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    /// Always carries `source`; domain tags such as `crop` or `category` are optional
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl Document {
    #[inline]
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
            embedding: Vec::new(),
        }
    }

    #[inline]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// String value of a metadata field, ignoring blanks and non-string values
    #[inline]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    #[inline]
    pub fn source(&self) -> Option<&str> {
        self.metadata_str("source")
    }

    /// True when every filter key is present with an equal value
    #[inline]
    pub fn matches(&self, filter: &MetadataFilter) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.metadata.get(key) == Some(value))
    }
}

/// Exact-match constraints on document metadata, e.g. `crop = "rice"`; empty matches everything
pub type MetadataFilter = BTreeMap<String, serde_json::Value>;

/// What to search a collection with
#[derive(Debug, Clone, Copy)]
pub enum QueryInput<'a> {
    /// Embedded by the store's own embedding provider
    Text(&'a str),
    Vector(&'a [f32]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    /// In `[0.0, 1.0]`, higher is more relevant
    pub similarity_score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Up to `top_k` documents from `collection` matching `filter`, most similar first
    async fn query(
        &self,
        collection: &str,
        input: QueryInput<'_>,
        filter: &MetadataFilter,
        top_k: usize,
    ) -> crate::Result<Vec<ScoredDocument>>;

    /// Insert documents, replacing any existing document with the same id
    async fn upsert(&self, collection: &str, documents: &[Document]) -> crate::Result<()>;

    async fn delete(&self, collection: &str, ids: &[String]) -> crate::Result<()>;

    /// Number of documents in `collection`, zero when it does not exist
    async fn count(&self, collection: &str) -> crate::Result<usize>;

    async fn list_collections(&self) -> crate::Result<Vec<String>>;
}

/// Collection names double as table names on disk
#[inline]
pub fn validate_collection_name(collection: &str) -> crate::Result<()> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(crate::RagError::VectorStore(format!(
            "Invalid collection name: '{collection}'"
        )))
    }
}
