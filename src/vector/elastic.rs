//! Elasticsearch vector store adapter (REST API)

use super::{
    metadata_with_lineage, ChildDocument, ScoredChild, SearchFilter, VectorStore, STORE_BATCH,
};
use crate::config::ElasticsearchConfig;
use crate::embedding::{Embedder, EMBEDDING_DIM};
use crate::error::{Result, VectorError};
use crate::models::Metadata;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub struct EsVectorStore {
    client: reqwest::Client,
    config: ElasticsearchConfig,
    index: String,
    embedder: Arc<dyn Embedder>,
    bootstrapped: OnceCell<()>,
}

impl EsVectorStore {
    pub fn new(config: ElasticsearchConfig, index: String, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            index,
            embedder,
            bootstrapped: OnceCell::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, self.url(path));
        if let Some(username) = &self.config.username {
            builder = builder.basic_auth(username, self.config.password.as_deref());
        }
        builder
    }

    /// Create the index with the fixed mapping when it does not exist yet
    async fn ensure_index(&self) -> Result<()> {
        self.bootstrapped
            .get_or_try_init(|| async {
                let head = self
                    .request(reqwest::Method::HEAD, &self.index)
                    .send()
                    .await
                    .map_err(|e| VectorError::CollectionSetup(e.to_string()))?;
                if head.status().is_success() {
                    return Ok(());
                }
                info!("Creating ES index {}", self.index);
                let mapping = json!({
                    "mappings": {
                        "properties": {
                            "content": {"type": "text"},
                            "content_vector": {
                                "type": "dense_vector",
                                "dims": EMBEDDING_DIM,
                                "index": true,
                                "similarity": "cosine"
                            },
                            "doc_id": {"type": "keyword"},
                            "parent_id": {"type": "keyword"},
                            "metadata": {"type": "object", "dynamic": true}
                        }
                    }
                });
                let response = self
                    .request(reqwest::Method::PUT, &self.index)
                    .json(&mapping)
                    .send()
                    .await
                    .map_err(|e| VectorError::CollectionSetup(e.to_string()))?;
                // concurrent creation races return resource_already_exists
                if !response.status().is_success() && response.status().as_u16() != 400 {
                    let body = response.text().await.unwrap_or_default();
                    return Err(VectorError::CollectionSetup(body).into());
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn embed_checked(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.embedder.embed(texts).await?;
        for vector in &vectors {
            if vector.len() != EMBEDDING_DIM {
                return Err(VectorError::InvalidDimension {
                    expected: EMBEDDING_DIM,
                    actual: vector.len(),
                }
                .into());
            }
        }
        Ok(vectors)
    }

    fn term_filters(filter: &SearchFilter) -> Vec<Value> {
        filter
            .iter()
            .map(|(key, value)| {
                // dynamic string fields index as text with a .keyword subfield
                let field = if value.is_string() {
                    format!("metadata.{}.keyword", key)
                } else {
                    format!("metadata.{}", key)
                };
                json!({"term": {field: value}})
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for EsVectorStore {
    async fn store(&self, docs: &[ChildDocument]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        self.ensure_index().await?;

        for batch in docs.chunks(STORE_BATCH) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let vectors = self.embed_checked(&texts).await?;

            let mut body = String::new();
            for (doc, vector) in batch.iter().zip(vectors) {
                let action = json!({"index": {"_index": self.index, "_id": doc.id}});
                let source = json!({
                    "content": doc.content,
                    "content_vector": vector,
                    "doc_id": doc.doc_id,
                    "parent_id": doc.parent_id,
                    "metadata": metadata_with_lineage(doc),
                });
                body.push_str(&action.to_string());
                body.push('\n');
                body.push_str(&source.to_string());
                body.push('\n');
            }

            let response = self
                .request(reqwest::Method::POST, "_bulk")
                .header("Content-Type", "application/x-ndjson")
                .body(body)
                .send()
                .await
                .map_err(|e| VectorError::StoreFailed(e.to_string()))?;
            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(VectorError::StoreFailed(text).into());
            }
            let result: Value = response
                .json()
                .await
                .map_err(|e| VectorError::StoreFailed(e.to_string()))?;
            if result["errors"].as_bool().unwrap_or(false) {
                return Err(VectorError::StoreFailed(result.to_string()).into());
            }
            debug!("Indexed {} children into {}", batch.len(), self.index);
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChild>> {
        let vectors = self.embed_checked(&[query.to_string()]).await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| VectorError::SearchFailed("empty embedding".to_string()))?;

        let mut knn = json!({
            "field": "content_vector",
            "query_vector": query_vector,
            "k": top_k,
            "num_candidates": top_k * 10,
        });
        if !filter.is_empty() {
            knn["filter"] = Value::Array(Self::term_filters(filter));
        }
        let body = json!({"knn": knn, "size": top_k, "_source": ["content", "metadata", "doc_id", "parent_id"]});

        let response = self
            .request(reqwest::Method::POST, &format!("{}/_search", self.index))
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::SearchFailed(e.to_string()))?;
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VectorError::SearchFailed(text).into());
        }
        let result: Value = response
            .json()
            .await
            .map_err(|e| VectorError::SearchFailed(e.to_string()))?;

        let hits = result["hits"]["hits"].as_array().cloned().unwrap_or_default();
        let mut children = Vec::with_capacity(hits.len());
        for hit in hits {
            let source = &hit["_source"];
            let mut metadata: Metadata = source["metadata"]
                .as_object()
                .cloned()
                .unwrap_or_default();
            for key in ["doc_id", "parent_id"] {
                if let Some(value) = source.get(key) {
                    metadata.entry(key.to_string()).or_insert_with(|| value.clone());
                }
            }
            children.push(ScoredChild {
                id: hit["_id"].as_str().unwrap_or_default().to_string(),
                content: source["content"].as_str().unwrap_or_default().to_string(),
                metadata,
                score: hit["_score"].as_f64().unwrap_or(0.0),
            });
        }
        Ok(children)
    }

    async fn delete_by_doc_id(&self, doc_id: &str) -> Result<()> {
        let body = json!({"query": {"term": {"doc_id": doc_id}}});
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("{}/_delete_by_query", self.index),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::DeleteFailed(e.to_string()))?;
        // a missing index means there is nothing to delete
        if response.status().as_u16() == 404 {
            warn!("ES index {} missing on delete, treating as success", self.index);
            return Ok(());
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VectorError::DeleteFailed(text).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FakeEmbedder {
        dim: usize,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1; self.dim]).collect())
        }
    }

    fn store(uri: &str, dim: usize) -> EsVectorStore {
        EsVectorStore::new(
            ElasticsearchConfig {
                url: uri.to_string(),
                username: None,
                password: None,
            },
            "kb_test".to_string(),
            Arc::new(FakeEmbedder { dim }),
        )
    }

    #[test]
    fn test_term_filters_string_targets_keyword() {
        let mut filter = SearchFilter::new();
        filter.insert("volume_name".to_string(), json!("卷一"));
        filter.insert("chapter_num".to_string(), json!(500));
        let terms = EsVectorStore::term_filters(&filter);
        let rendered = serde_json::to_string(&terms).unwrap();
        assert!(rendered.contains("metadata.volume_name.keyword"));
        assert!(rendered.contains("metadata.chapter_num"));
        assert!(!rendered.contains("metadata.chapter_num.keyword"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_hard() {
        let server = MockServer::start().await;
        let store = store(&server.uri(), 4);
        let err = store.search("query", 10, &SearchFilter::new()).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::PlatformError::Vector(VectorError::InvalidDimension { expected: 768, actual: 4 })
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_index_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/kb_test/_delete_by_query"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let store = store(&server.uri(), 768);
        store.delete_by_doc_id("doc-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_search_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/kb_test/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": {"hits": [
                    {"_id": "c1", "_score": 0.9, "_source": {
                        "content": "hello",
                        "doc_id": "d1",
                        "parent_id": "p1",
                        "metadata": {"parent_id": "p1", "doc_id": "d1", "h1": "Guide"}
                    }}
                ]}
            })))
            .mount(&server)
            .await;
        let store = store(&server.uri(), 768);
        let hits = store.search("query", 10, &SearchFilter::new()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c1");
        assert_eq!(hits[0].metadata["parent_id"], "p1");
        assert!((hits[0].score - 0.9).abs() < f64::EPSILON);
    }
}
