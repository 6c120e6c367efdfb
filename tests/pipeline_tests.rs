//! Retrieval pipeline tests: intent extraction against a mock model,
//! promotion ordering, and filter propagation into the vector backend.

use atheneum::embedding::{Embedder, EMBEDDING_DIM};
use atheneum::llm::OpenAiChatModel;
use atheneum::models::{Metadata, ModelParameters};
use atheneum::vector::{EsVectorStore, VectorStore};
use atheneum::{extract_intent, promote, ScoredChild};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn child(parent_id: &str, score: f64) -> ScoredChild {
    let mut metadata = Metadata::new();
    metadata.insert("parent_id".to_string(), json!(parent_id));
    ScoredChild {
        id: uuid::Uuid::new_v4().to_string(),
        content: "child text".to_string(),
        metadata,
        score,
    }
}

#[test]
fn promotion_keeps_first_seen_order_with_best_scores() {
    let hits = vec![
        child("P2", 0.9),
        child("P1", 0.8),
        child("P2", 0.7),
        child("P3", 0.6),
    ];
    let promoted = promote(&hits);
    let ids: Vec<&str> = promoted.iter().map(|(id, _)| id.as_str()).collect();
    let scores: Vec<f64> = promoted.iter().map(|(_, s)| *s).collect();
    assert_eq!(ids, vec!["P2", "P1", "P3"]);
    assert_eq!(scores, vec![0.9, 0.8, 0.6]);
}

#[tokio::test]
async fn intent_extraction_yields_chapter_filters() {
    let server = MockServer::start().await;
    let fenced = "```json\n{\"keywords\":\"讲了什么\",\"volume_num\":4,\"chapter_num\":500}\n```";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": fenced}}]
        })))
        .mount(&server)
        .await;

    let model = OpenAiChatModel::new(
        format!("{}/v1", server.uri()),
        String::new(),
        "intent-model".to_string(),
        ModelParameters::default(),
    );
    let intent = extract_intent(&model, "凡人修仙传第四卷第五百章讲了什么").await;

    assert_eq!(intent.keywords, "讲了什么");
    let filter = intent.filter();
    assert_eq!(filter["volume_num"], 4);
    assert_eq!(filter["chapter_num"], 500);
}

#[tokio::test]
async fn intent_extraction_degrades_when_model_is_down() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let model = OpenAiChatModel::new(
        format!("{}/v1", server.uri()),
        String::new(),
        "intent-model".to_string(),
        ModelParameters::default(),
    );
    let intent = extract_intent(&model, "原始查询").await;
    assert_eq!(intent.keywords, "原始查询");
    assert!(intent.filter().is_empty());
}

struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> atheneum::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.25; EMBEDDING_DIM]).collect())
    }
}

#[tokio::test]
async fn search_filters_reach_the_vector_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/kb_filter_test/_search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": {"hits": []}})))
        .mount(&server)
        .await;

    let store = EsVectorStore::new(
        atheneum::config::ElasticsearchConfig {
            url: server.uri(),
            username: None,
            password: None,
        },
        "kb_filter_test".to_string(),
        Arc::new(FixedEmbedder),
    );

    let mut filter = atheneum::SearchFilter::new();
    filter.insert("volume_num".to_string(), json!(4));
    filter.insert("chapter_num".to_string(), json!(500));
    store.search("讲了什么", 10, &filter).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let search_request = requests
        .iter()
        .find(|r| r.url.path().ends_with("/_search"))
        .expect("search request sent");
    let body: serde_json::Value = serde_json::from_slice(&search_request.body).unwrap();
    let filters = body["knn"]["filter"].as_array().expect("knn filter array");
    let rendered = serde_json::to_string(filters).unwrap();
    assert!(rendered.contains("metadata.volume_num"));
    assert!(rendered.contains("metadata.chapter_num"));
    assert_eq!(body["knn"]["k"], 10);
}

#[tokio::test]
async fn promotion_of_empty_hits_is_empty() {
    assert!(promote(&[]).is_empty());
}
