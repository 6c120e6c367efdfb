//! Milvus vector store adapter (RESTful v2 API)

use super::{
    metadata_with_lineage, ChildDocument, ScoredChild, SearchFilter, VectorStore, STORE_BATCH,
};
use crate::config::MilvusConfig;
use crate::embedding::{Embedder, EMBEDDING_DIM};
use crate::error::{Result, VectorError};
use crate::models::Metadata;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub struct MilvusVectorStore {
    client: reqwest::Client,
    config: MilvusConfig,
    collection: String,
    embedder: Arc<dyn Embedder>,
    bootstrapped: OnceCell<()>,
}

impl MilvusVectorStore {
    pub fn new(config: MilvusConfig, collection: String, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            collection,
            embedder,
            bootstrapped: OnceCell::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{}", self.config.url.trim_end_matches('/'), path);
        let mut builder = self.client.post(&url).json(&body);
        if let Some(token) = &self.config.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| VectorError::StoreFailed(e.to_string()))?;
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VectorError::StoreFailed(text).into());
        }
        response
            .json()
            .await
            .map_err(|e| VectorError::StoreFailed(e.to_string()).into())
    }

    /// Create the collection with the fixed schema, HNSW cosine index, and
    /// load it, when it does not exist yet.
    async fn ensure_collection(&self) -> Result<()> {
        self.bootstrapped
            .get_or_try_init(|| async {
                let has = self
                    .post(
                        "/v2/vectordb/collections/has",
                        json!({"collectionName": self.collection}),
                    )
                    .await?;
                if has["data"]["has"].as_bool().unwrap_or(false) {
                    return Ok(());
                }
                info!("Creating Milvus collection {}", self.collection);
                let schema = json!({
                    "collectionName": self.collection,
                    "schema": {
                        "autoID": false,
                        "fields": [
                            {"fieldName": "id", "dataType": "VarChar", "isPrimary": true,
                             "elementTypeParams": {"max_length": "128"}},
                            {"fieldName": "parent_id", "dataType": "VarChar",
                             "elementTypeParams": {"max_length": "128"}},
                            {"fieldName": "doc_id", "dataType": "VarChar",
                             "elementTypeParams": {"max_length": "128"}},
                            {"fieldName": "content", "dataType": "VarChar",
                             "elementTypeParams": {"max_length": "8192"}},
                            {"fieldName": "vector", "dataType": "FloatVector",
                             "elementTypeParams": {"dim": EMBEDDING_DIM.to_string()}},
                            {"fieldName": "metadata", "dataType": "JSON"}
                        ]
                    },
                    "indexParams": [{
                        "fieldName": "vector",
                        "indexName": "vector_idx",
                        "metricType": "COSINE",
                        "indexType": "HNSW",
                        "params": {"M": 16, "efConstruction": 200}
                    }]
                });
                let created = self.post("/v2/vectordb/collections/create", schema).await?;
                if !Self::is_success_code(&created) {
                    return Err(
                        VectorError::CollectionSetup(created["message"].to_string()).into()
                    );
                }
                self.post(
                    "/v2/vectordb/collections/load",
                    json!({"collectionName": self.collection}),
                )
                .await?;
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

    /// Older server builds report success as 200 instead of 0
    fn is_success_code(result: &Value) -> bool {
        matches!(result["code"].as_i64().unwrap_or(0), 0 | 200)
    }

    /// Render the flat equality filter as a Milvus boolean expression
    fn filter_expr(filter: &SearchFilter) -> String {
        let mut parts = Vec::new();
        for (key, value) in filter {
            let rendered = match value {
                Value::String(s) => format!("metadata['{}'] == '{}'", key, s),
                Value::Number(n) => format!("metadata['{}'] == {}", key, n),
                Value::Bool(b) => format!("metadata['{}'] == {}", key, b),
                _ => continue,
            };
            parts.push(rendered);
        }
        parts.join(" AND ")
    }
}

#[async_trait]
impl VectorStore for MilvusVectorStore {
    async fn store(&self, docs: &[ChildDocument]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        self.ensure_collection().await?;

        for batch in docs.chunks(STORE_BATCH) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let vectors = self.embed_checked(&texts).await?;

            let rows: Vec<Value> = batch
                .iter()
                .zip(vectors)
                .map(|(doc, vector)| {
                    json!({
                        "id": doc.id,
                        "parent_id": doc.parent_id,
                        "doc_id": doc.doc_id,
                        "content": doc.content,
                        "vector": vector,
                        "metadata": metadata_with_lineage(doc),
                    })
                })
                .collect();

            let result = self
                .post(
                    "/v2/vectordb/entities/insert",
                    json!({"collectionName": self.collection, "data": rows}),
                )
                .await?;
            if !Self::is_success_code(&result) {
                return Err(VectorError::StoreFailed(result["message"].to_string()).into());
            }
            debug!("Inserted {} children into {}", batch.len(), self.collection);
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

        let mut body = json!({
            "collectionName": self.collection,
            "data": [query_vector],
            "annsField": "vector",
            "limit": top_k,
            "outputFields": ["id", "content", "metadata"],
        });
        let expr = Self::filter_expr(filter);
        if !expr.is_empty() {
            debug!("milvus filter: {}", expr);
            body["filter"] = json!(expr);
        }

        let result = self.post("/v2/vectordb/entities/search", body).await?;
        if !Self::is_success_code(&result) {
            return Err(VectorError::SearchFailed(result["message"].to_string()).into());
        }

        let rows = result["data"].as_array().cloned().unwrap_or_default();
        let mut children = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata: Metadata = match &row["metadata"] {
                Value::Object(map) => map.clone(),
                // some server versions return the JSON field as a string
                Value::String(s) => serde_json::from_str(s).unwrap_or_default(),
                _ => Metadata::new(),
            };
            children.push(ScoredChild {
                id: row["id"].as_str().unwrap_or_default().to_string(),
                content: row["content"].as_str().unwrap_or_default().to_string(),
                metadata,
                score: row["distance"].as_f64().unwrap_or(0.0),
            });
        }
        Ok(children)
    }

    async fn delete_by_doc_id(&self, doc_id: &str) -> Result<()> {
        let result = self
            .post(
                "/v2/vectordb/entities/delete",
                json!({
                    "collectionName": self.collection,
                    "filter": format!("doc_id == \"{}\"", doc_id),
                }),
            )
            .await?;
        if !Self::is_success_code(&result) {
            let message = result["message"].to_string();
            // deleting from a collection that was never created is a no-op
            if message.contains("not found") || message.contains("can't find collection") {
                warn!(
                    "Milvus collection {} missing on delete, treating as success",
                    self.collection
                );
                return Ok(());
            }
            return Err(VectorError::DeleteFailed(message).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5; EMBEDDING_DIM]).collect())
        }
    }

    fn store(uri: &str) -> MilvusVectorStore {
        MilvusVectorStore::new(
            MilvusConfig {
                url: uri.to_string(),
                token: None,
            },
            "kb_test".to_string(),
            Arc::new(FakeEmbedder),
        )
    }

    #[test]
    fn test_filter_expr_types() {
        let mut filter = SearchFilter::new();
        filter.insert("chapter_num".to_string(), json!(500));
        filter.insert("volume_name".to_string(), json!("卷一"));
        filter.insert("enabled".to_string(), json!(true));
        let expr = MilvusVectorStore::filter_expr(&filter);
        assert!(expr.contains("metadata['chapter_num'] == 500"));
        assert!(expr.contains("metadata['volume_name'] == '卷一'"));
        assert!(expr.contains("metadata['enabled'] == true"));
        assert_eq!(expr.matches(" AND ").count(), 2);
    }

    #[test]
    fn test_empty_filter_expr() {
        assert!(MilvusVectorStore::filter_expr(&SearchFilter::new()).is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_collection_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/delete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 100,
                "message": "collection not found[collection=kb_test]"
            })))
            .mount(&server)
            .await;
        store(&server.uri()).delete_by_doc_id("doc-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_search_parses_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": [
                    {"id": "c1", "content": "hello", "distance": 0.88,
                     "metadata": {"parent_id": "p1", "doc_id": "d1"}}
                ]
            })))
            .mount(&server)
            .await;
        let hits = store(&server.uri())
            .search("query", 10, &SearchFilter::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["parent_id"], "p1");
        assert!((hits[0].score - 0.88).abs() < 1e-9);
    }
}
