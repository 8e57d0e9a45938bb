use super::*;
use serde_json::json;
use std::collections::BTreeMap;

struct AxisEmbedder;

#[async_trait]
impl EmbeddingProvider for AxisEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(if text.contains("rice") {
            vec![1.0, 0.0]
        } else {
            vec![0.0, 1.0]
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn model_name(&self) -> &str {
        "axis"
    }

    fn dims(&self) -> usize {
        2
    }
}

fn doc(id: &str, embedding: Vec<f32>) -> Document {
    Document::new(
        id,
        format!("content for {id}"),
        BTreeMap::from([("source".to_string(), json!("test"))]),
    )
    .with_embedding(embedding)
}

#[tokio::test]
async fn vector_query_ranks_by_similarity() {
    let store = InMemoryVectorStore::new();
    store
        .upsert(
            "crops",
            &[
                doc("far", vec![0.0, 1.0]),
                doc("near", vec![1.0, 0.1]),
                doc("exact", vec![1.0, 0.0]),
            ],
        )
        .await
        .expect("should upsert documents");

    let results = store
        .query("crops", QueryInput::Vector(&[1.0, 0.0]), &MetadataFilter::new(), 2)
        .await
        .expect("should query collection");

    let ids: Vec<&str> = results.iter().map(|r| r.document.id.as_str()).collect();
    assert_eq!(ids, vec!["exact", "near"]);
    assert!((results[0].similarity_score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn opposite_vectors_clamp_to_zero() {
    let store = InMemoryVectorStore::new();
    store
        .upsert("crops", &[doc("opposite", vec![-1.0, 0.0])])
        .await
        .expect("should upsert documents");

    let results = store
        .query("crops", QueryInput::Vector(&[1.0, 0.0]), &MetadataFilter::new(), 5)
        .await
        .expect("should query collection");

    assert_eq!(results.len(), 1);
    assert!(results[0].similarity_score.abs() < f32::EPSILON);
}

#[tokio::test]
async fn upsert_replaces_by_id() {
    let store = InMemoryVectorStore::new();
    store
        .upsert("crops", &[doc("a", vec![1.0, 0.0])])
        .await
        .expect("should upsert documents");
    store
        .upsert("crops", &[doc("a", vec![0.0, 1.0]), doc("b", vec![1.0, 1.0])])
        .await
        .expect("should upsert documents");

    assert_eq!(store.count("crops").await.expect("should count"), 2);

    let results = store
        .query("crops", QueryInput::Vector(&[0.0, 1.0]), &MetadataFilter::new(), 1)
        .await
        .expect("should query collection");
    assert_eq!(results[0].document.id, "a");
}

#[tokio::test]
async fn delete_and_count() {
    let store = InMemoryVectorStore::new();
    store
        .upsert("crops", &[doc("a", vec![1.0, 0.0]), doc("b", vec![0.0, 1.0])])
        .await
        .expect("should upsert documents");

    store
        .delete("crops", &["a".to_string()])
        .await
        .expect("should delete documents");

    assert_eq!(store.count("crops").await.expect("should count"), 1);
    assert_eq!(store.count("unknown").await.expect("should count"), 0);
    assert_eq!(
        store.list_collections().await.expect("should list"),
        vec!["crops".to_string()]
    );
}

#[tokio::test]
async fn unknown_collection_is_an_error() {
    let store = InMemoryVectorStore::new();
    let result = store
        .query("missing", QueryInput::Vector(&[1.0, 0.0]), &MetadataFilter::new(), 3)
        .await;

    assert!(matches!(result, Err(RagError::VectorStore(_))));
}

#[tokio::test]
async fn text_query_requires_embedder() {
    let store = InMemoryVectorStore::new();
    store
        .upsert("crops", &[doc("a", vec![1.0, 0.0])])
        .await
        .expect("should upsert documents");

    assert!(
        store
            .query("crops", QueryInput::Text("rice"), &MetadataFilter::new(), 1)
            .await
            .is_err()
    );

    let store = InMemoryVectorStore::with_embedder(Arc::new(AxisEmbedder));
    store
        .upsert("crops", &[doc("rice", vec![1.0, 0.0]), doc("wheat", vec![0.0, 1.0])])
        .await
        .expect("should upsert documents");

    let results = store
        .query("crops", QueryInput::Text("rice blast"), &MetadataFilter::new(), 1)
        .await
        .expect("should query by text");
    assert_eq!(results[0].document.id, "rice");
}

#[tokio::test]
async fn metadata_filter_applies_before_top_k() {
    let store = InMemoryVectorStore::new();
    let tagged = |id: &str, crop: &str, embedding: Vec<f32>| {
        let mut document = doc(id, embedding);
        document.metadata.insert("crop".to_string(), json!(crop));
        document
    };
    store
        .upsert(
            "crops",
            &[
                tagged("wheat-exact", "wheat", vec![1.0, 0.0]),
                tagged("rice-near", "rice", vec![1.0, 0.2]),
                tagged("rice-far", "rice", vec![0.1, 1.0]),
            ],
        )
        .await
        .expect("should upsert documents");

    let rice = MetadataFilter::from([("crop".to_string(), json!("rice"))]);
    let results = store
        .query("crops", QueryInput::Vector(&[1.0, 0.0]), &rice, 1)
        .await
        .expect("should query collection");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.id, "rice-near");

    let maize = MetadataFilter::from([("crop".to_string(), json!("maize"))]);
    let results = store
        .query("crops", QueryInput::Vector(&[1.0, 0.0]), &maize, 3)
        .await
        .expect("should query collection");
    assert!(results.is_empty());
}
