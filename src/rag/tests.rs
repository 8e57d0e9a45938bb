use super::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

fn candidate(metadata: BTreeMap<String, serde_json::Value>) -> RetrievedCandidate {
    RetrievedCandidate {
        document: Document::new("doc-1", "content", metadata),
        similarity_score: 0.8,
        collection: "crop_diseases".to_string(),
        retrieval_query: "rice blast".to_string(),
        retrieved_at: Utc::now(),
    }
}

#[test]
fn source_record_defaults() {
    let record = candidate(BTreeMap::new()).source_record();

    assert_eq!(record.id, "doc-1");
    assert_eq!(record.source, "Unknown");
    assert_eq!(record.category, "General");
    assert_eq!(record.collection, "crop_diseases");
}

#[test]
fn source_record_uses_metadata() {
    let record = candidate(BTreeMap::from([
        ("source".to_string(), json!("ICAR")),
        ("category".to_string(), json!("disease")),
    ]))
    .source_record();

    assert_eq!(record.source, "ICAR");
    assert_eq!(record.category, "disease");
}

#[test]
fn response_type_keys() {
    assert_eq!(ResponseType::Concise.as_str(), "concise");
    assert_eq!(ResponseType::default(), ResponseType::Comprehensive);
    assert_eq!(ResponseType::Technical.to_string(), "technical");
    assert_eq!(
        serde_json::to_value(ResponseType::Concise).expect("should serialize"),
        "concise"
    );
}

#[test]
fn outcome_serialization() {
    assert_eq!(
        serde_json::to_value(Outcome::Success).expect("should serialize"),
        json!({ "status": "success" })
    );
    assert_eq!(
        serde_json::to_value(Outcome::Fallback {
            reason: FallbackReason::GenerationExhausted
        })
        .expect("should serialize"),
        json!({ "status": "fallback", "reason": "generation_exhausted" })
    );
}

#[test]
fn provider_metadata_from_completion() {
    let completion = Completion {
        text: "t".to_string(),
        provider: "anthropic".to_string(),
        model: "claude".to_string(),
        tokens_used: 12,
        latency: Duration::from_millis(250),
    };

    let metadata = ProviderMetadata::from(&completion);
    assert_eq!(metadata.provider.as_deref(), Some("anthropic"));
    assert_eq!(metadata.latency_ms, 250);
    assert!(metadata.error.is_none());
}
