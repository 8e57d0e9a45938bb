use super::*;
use crate::RagError;
use crate::store::Document;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Clone)]
enum Reply {
    Scores(Vec<f32>),
    Fail,
    Slow(Vec<f32>),
}

/// Answers each collection with canned scores and records what it was asked
#[derive(Default)]
struct CannedStore {
    replies: HashMap<String, Reply>,
    queried: Mutex<Vec<(String, bool)>>,
}

impl CannedStore {
    fn with(mut self, collection: &str, reply: Reply) -> Self {
        self.replies.insert(collection.to_string(), reply);
        self
    }

    fn queried(&self) -> Vec<(String, bool)> {
        self.queried
            .lock()
            .expect("should lock query log")
            .clone()
    }
}

fn scored(collection: &str, scores: &[f32]) -> Vec<ScoredDocument> {
    scores
        .iter()
        .enumerate()
        .map(|(rank, score)| ScoredDocument {
            document: Document::new(
                format!("{collection}-{rank}"),
                format!("content {rank}"),
                BTreeMap::from([("source".to_string(), json!(collection))]),
            ),
            similarity_score: *score,
        })
        .collect()
}

#[async_trait]
impl VectorStore for CannedStore {
    async fn query(
        &self,
        collection: &str,
        input: QueryInput<'_>,
        filter: &MetadataFilter,
        top_k: usize,
    ) -> crate::Result<Vec<ScoredDocument>> {
        self.queried
            .lock()
            .expect("should lock query log")
            .push((collection.to_string(), matches!(input, QueryInput::Vector(_))));

        let mut results = match self.replies.get(collection) {
            Some(Reply::Scores(scores)) => scored(collection, scores),
            Some(Reply::Slow(scores)) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                scored(collection, scores)
            }
            Some(Reply::Fail) | None => {
                return Err(RagError::VectorStore(format!("{collection} unavailable")));
            }
        };
        results.retain(|scored| scored.document.matches(filter));
        results.truncate(top_k);
        Ok(results)
    }

    async fn upsert(&self, _collection: &str, _documents: &[Document]) -> crate::Result<()> {
        Ok(())
    }

    async fn delete(&self, _collection: &str, _ids: &[String]) -> crate::Result<()> {
        Ok(())
    }

    async fn count(&self, _collection: &str) -> crate::Result<usize> {
        Ok(0)
    }

    async fn list_collections(&self) -> crate::Result<Vec<String>> {
        Ok(self.replies.keys().cloned().collect())
    }
}

struct ConstantEmbedder;

#[async_trait]
impl EmbeddingProvider for ConstantEmbedder {
    async fn embed(&self, _text: &str) -> crate::Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }

    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        Ok(vec![vec![1.0, 0.0]; texts.len()])
    }

    fn model_name(&self) -> &str {
        "constant"
    }

    fn dims(&self) -> usize {
        2
    }
}

fn retriever(store: CannedStore) -> (Retriever, Arc<CannedStore>) {
    let store = Arc::new(store);
    let config = RetrievalConfig {
        default_collections: vec!["general".to_string(), "schemes".to_string()],
        ..RetrievalConfig::default()
    };
    (Retriever::new(Arc::clone(&store) as Arc<dyn VectorStore>, None, &config), store)
}

fn names(collections: &[&str]) -> Vec<String> {
    collections.iter().map(|c| (*c).to_string()).collect()
}

fn no_filter() -> MetadataFilter {
    MetadataFilter::new()
}

fn scores(candidates: &[RetrievedCandidate]) -> Vec<f32> {
    candidates.iter().map(|c| c.similarity_score).collect()
}

#[tokio::test]
async fn filters_by_threshold_and_truncates() {
    let (retriever, _) = retriever(
        CannedStore::default().with("diseases", Reply::Scores(vec![0.9, 0.75, 0.55, 0.4, 0.2])),
    );

    let candidates = retriever
        .retrieve("leaf spots on rice", &names(&["diseases"]), &no_filter(), 3, 0.6, None)
        .await;

    assert_eq!(scores(&candidates), vec![0.9, 0.75]);
}

#[tokio::test]
async fn merges_collections_by_score_with_stable_ties() {
    let (retriever, _) = retriever(
        CannedStore::default()
            .with("a", Reply::Scores(vec![0.7, 0.5]))
            .with("b", Reply::Scores(vec![0.9, 0.7])),
    );

    let candidates = retriever
        .retrieve("query", &names(&["a", "b"]), &no_filter(), 10, 0.0, None)
        .await;

    let ids: Vec<&str> = candidates.iter().map(|c| c.document.id.as_str()).collect();
    assert_eq!(ids, vec!["b-0", "a-0", "b-1", "a-1"]);
    assert!(candidates.windows(2).all(|w| w[0].similarity_score >= w[1].similarity_score));
}

#[tokio::test]
async fn stamps_candidates() {
    let (retriever, _) =
        retriever(CannedStore::default().with("schemes", Reply::Scores(vec![0.8])));

    let before = Utc::now();
    let candidates = retriever
        .retrieve("PM-KISAN eligibility", &names(&["schemes"]), &no_filter(), 5, 0.3, None)
        .await;

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].collection, "schemes");
    assert_eq!(candidates[0].retrieval_query, "PM-KISAN eligibility");
    assert!(candidates[0].retrieved_at >= before);
}

#[tokio::test]
async fn failed_collection_is_treated_as_empty() {
    let (retriever, store) = retriever(
        CannedStore::default()
            .with("broken", Reply::Fail)
            .with("ok", Reply::Scores(vec![0.8])),
    );

    let candidates = retriever
        .retrieve("query", &names(&["broken", "ok"]), &no_filter(), 5, 0.3, None)
        .await;

    assert_eq!(scores(&candidates), vec![0.8]);
    assert_eq!(store.queried().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_collection_does_not_block_others() {
    let (retriever, _) = retriever(
        CannedStore::default()
            .with("slow", Reply::Slow(vec![0.99]))
            .with("fast", Reply::Scores(vec![0.5])),
    );

    let started = Instant::now();
    let candidates = retriever
        .retrieve("query", &names(&["slow", "fast"]), &no_filter(), 5, 0.3, None)
        .await;

    assert_eq!(scores(&candidates), vec![0.5]);
    assert_eq!(started.elapsed(), RetrievalConfig::default().query_timeout());
}

#[tokio::test(start_paused = true)]
async fn deadline_shortens_collection_timeout() {
    let (retriever, _) =
        retriever(CannedStore::default().with("slow", Reply::Slow(vec![0.99])));

    let started = Instant::now();
    let candidates = retriever
        .retrieve(
            "query",
            &names(&["slow"]),
            &no_filter(),
            5,
            0.3,
            Some(started + Duration::from_secs(2)),
        )
        .await;

    assert!(candidates.is_empty());
    assert_eq!(started.elapsed(), Duration::from_secs(2));
}

#[tokio::test]
async fn all_failures_yield_empty() {
    let (retriever, _) = retriever(CannedStore::default().with("broken", Reply::Fail));

    let candidates = retriever
        .retrieve("query", &names(&["broken", "missing"]), &no_filter(), 5, 0.3, None)
        .await;

    assert!(candidates.is_empty());
}

#[tokio::test]
async fn empty_collection_list_uses_defaults() {
    let (retriever, store) = retriever(
        CannedStore::default()
            .with("general", Reply::Scores(vec![0.6]))
            .with("schemes", Reply::Scores(vec![0.4])),
    );

    let candidates = retriever.retrieve("query", &[], &no_filter(), 5, 0.3, None).await;

    assert_eq!(candidates.len(), 2);
    let queried: Vec<String> = store.queried().into_iter().map(|(c, _)| c).collect();
    assert_eq!(queried, names(&["general", "schemes"]));
    assert_eq!(retriever.default_collections(), names(&["general", "schemes"]));
}

#[tokio::test]
async fn duplicate_collections_are_queried_once() {
    let (retriever, store) =
        retriever(CannedStore::default().with("a", Reply::Scores(vec![0.9])));

    let candidates = retriever
        .retrieve("query", &names(&["a", "a"]), &no_filter(), 5, 0.3, None)
        .await;

    assert_eq!(candidates.len(), 1);
    assert_eq!(store.queried().len(), 1);
}

#[tokio::test]
async fn zero_top_k_skips_the_store() {
    let (retriever, store) =
        retriever(CannedStore::default().with("a", Reply::Scores(vec![0.9])));

    let candidates = retriever.retrieve("query", &names(&["a"]), &no_filter(), 0, 0.3, None).await;

    assert!(candidates.is_empty());
    assert!(store.queried().is_empty());
}

#[tokio::test]
async fn threshold_is_clamped() {
    let (retriever, _) =
        retriever(CannedStore::default().with("a", Reply::Scores(vec![1.0, 0.99])));

    let strict = retriever.retrieve("query", &names(&["a"]), &no_filter(), 5, 7.0, None).await;
    assert_eq!(scores(&strict), vec![1.0]);

    let lenient = retriever.retrieve("query", &names(&["a"]), &no_filter(), 5, -1.0, None).await;
    assert_eq!(lenient.len(), 2);
}

#[tokio::test]
async fn embedder_turns_query_into_vector() {
    let store = Arc::new(CannedStore::default().with("a", Reply::Scores(vec![0.9])));
    let retriever = Retriever::new(
        Arc::clone(&store) as Arc<dyn VectorStore>,
        Some(Arc::new(ConstantEmbedder)),
        &RetrievalConfig::default(),
    );

    retriever.retrieve("query", &names(&["a"]), &no_filter(), 5, 0.3, None).await;

    assert_eq!(store.queried(), vec![("a".to_string(), true)]);
}

#[tokio::test]
async fn metadata_filter_reaches_every_collection() {
    let (retriever, store) = retriever(
        CannedStore::default()
            .with("a", Reply::Scores(vec![0.9, 0.8]))
            .with("b", Reply::Scores(vec![0.7])),
    );
    let filter = MetadataFilter::from([("source".to_string(), json!("b"))]);

    let candidates = retriever
        .retrieve("query", &names(&["a", "b"]), &filter, 5, 0.3, None)
        .await;

    assert_eq!(scores(&candidates), vec![0.7]);
    assert_eq!(candidates[0].collection, "b");
    assert_eq!(store.queried().len(), 2);
}
