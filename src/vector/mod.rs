//! Vector store abstraction over Elasticsearch and Milvus
//!
//! Both backends sit behind one contract: `store` embeds and indexes child
//! documents in bounded batches, `search` returns children ranked by
//! cosine similarity with a flat metadata equality filter, and
//! `delete_by_doc_id` removes every child of a document idempotently.

mod elastic;
mod milvus;

pub use elastic::EsVectorStore;
pub use milvus::MilvusVectorStore;

use crate::error::Result;
use crate::models::Metadata;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Insert batches are capped at this size to bound request payloads
pub const STORE_BATCH: usize = 50;

/// Flat `{key: value}` map interpreted as a metadata equality conjunction.
/// Supported value types: string, integer, float, bool.
pub type SearchFilter = serde_json::Map<String, Value>;

/// A child document to embed and index
#[derive(Debug, Clone)]
pub struct ChildDocument {
    /// Globally unique vector-side id
    pub id: String,
    /// Parent chunk id this child belongs to
    pub parent_id: String,
    /// Owning document id
    pub doc_id: String,
    /// Breadcrumb-prefixed content
    pub content: String,
    pub metadata: Metadata,
}

/// A search hit from the vector store
#[derive(Debug, Clone)]
pub struct ScoredChild {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub score: f64,
}

/// Unified Store/Search contract over the vector backends
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and index a batch of children (internally chunked to
    /// [`STORE_BATCH`])
    async fn store(&self, docs: &[ChildDocument]) -> Result<()>;

    /// Top-k children by cosine similarity, filtered by metadata equality
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChild>>;

    /// Remove all children of a document. Missing collections/indices are
    /// treated as success so deletes stay idempotent.
    async fn delete_by_doc_id(&self, doc_id: &str) -> Result<()>;
}

/// Index/collection name for a knowledge base: `kb_<uuid>` with dashes
/// replaced by underscores.
pub fn index_name(kb_id: Uuid) -> String {
    format!("kb_{}", kb_id.to_string().replace('-', "_"))
}

/// Process-wide router over the configured backends. Stores are created
/// lazily per knowledge base (routed by its `storage_type`) and reused
/// across requests.
pub struct VectorStoreRouter {
    config: crate::config::VectorConfig,
    cache: tokio::sync::RwLock<std::collections::HashMap<String, std::sync::Arc<dyn VectorStore>>>,
}

impl VectorStoreRouter {
    pub fn new(config: crate::config::VectorConfig) -> Self {
        Self {
            config,
            cache: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub async fn store_for(
        &self,
        kb: &crate::models::KnowledgeBase,
        embedder: std::sync::Arc<dyn crate::embedding::Embedder>,
    ) -> std::sync::Arc<dyn VectorStore> {
        let index = index_name(kb.id);
        if let Some(store) = self.cache.read().await.get(&index) {
            return store.clone();
        }
        let store: std::sync::Arc<dyn VectorStore> = match kb.storage_type {
            crate::models::StorageType::Es => std::sync::Arc::new(EsVectorStore::new(
                self.config.elasticsearch.clone(),
                index.clone(),
                embedder,
            )),
            crate::models::StorageType::Milvus => std::sync::Arc::new(MilvusVectorStore::new(
                self.config.milvus.clone(),
                index.clone(),
                embedder,
            )),
        };
        self.cache.write().await.insert(index, store.clone());
        store
    }
}

/// Copy the lineage ids into the metadata map the backends persist, so
/// hits can be promoted without a second lookup.
pub(crate) fn metadata_with_lineage(doc: &ChildDocument) -> Metadata {
    let mut metadata = doc.metadata.clone();
    metadata.insert("parent_id".to_string(), Value::String(doc.parent_id.clone()));
    metadata.insert("doc_id".to_string(), Value::String(doc.doc_id.clone()));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name() {
        let id = Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        assert_eq!(index_name(id), "kb_6ba7b810_9dad_11d1_80b4_00c04fd430c8");
    }

    #[test]
    fn test_metadata_with_lineage() {
        let doc = ChildDocument {
            id: "c1".to_string(),
            parent_id: "p1".to_string(),
            doc_id: "d1".to_string(),
            content: "text".to_string(),
            metadata: Metadata::new(),
        };
        let metadata = metadata_with_lineage(&doc);
        assert_eq!(metadata["parent_id"], "p1");
        assert_eq!(metadata["doc_id"], "d1");
    }
}
