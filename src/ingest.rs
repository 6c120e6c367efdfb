//! Document ingestion orchestrator
//!
//! `ingest` persists the Document row in `pending` and returns; a detached
//! background task runs the chunk → embed → index pipeline and drives the
//! status machine `pending → processing → {completed | failed}`. Every
//! transition is written to SQL before further work. Deletion removes the
//! document row, its parent chunks and its vectors in one transaction.

use crate::chunking::{self, count_tokens};
use crate::embedding::{build_embedder, Embedder};
use crate::error::{LlmError, PlatformError, Result};
use crate::models::{
    ChunkStatus, Document, DocumentChunk, DocumentStatus, KnowledgeBase, Metadata,
};
use crate::providers::ProviderDirectory;
use crate::repository::Repository;
use crate::vector::{ChildDocument, VectorStoreRouter};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct IngestService {
    repo: Repository,
    directory: Arc<dyn ProviderDirectory>,
    vectors: Arc<VectorStoreRouter>,
    shutdown: CancellationToken,
}

impl IngestService {
    pub fn new(
        repo: Repository,
        directory: Arc<dyn ProviderDirectory>,
        vectors: Arc<VectorStoreRouter>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            repo,
            directory,
            vectors,
            shutdown,
        }
    }

    /// Persist the document in `pending` and spawn the indexing task.
    /// Returns as soon as the row is durable; the task owns its own
    /// lifetime and survives the upload request.
    pub async fn ingest(
        &self,
        kb_id: Uuid,
        user_id: Uuid,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Document> {
        let kb = self
            .repo
            .get_knowledge_base(kb_id, user_id)
            .await?
            .ok_or(PlatformError::KnowledgeBaseNotFound)?;
        if bytes.is_empty() {
            return Err(PlatformError::FileLoad("empty file".to_string()));
        }

        let ext = file_name
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let file_hash = format!("{:x}", Sha256::digest(&bytes));
        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            kb_id,
            creator_id: user_id,
            name: file_name.to_string(),
            file_type: ext,
            size: bytes.len() as i64,
            token_count: 0,
            storage_key: file_name.to_string(),
            file_hash,
            status: DocumentStatus::Pending,
            error_message: String::new(),
            meta_info: Metadata::new(),
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        self.repo.create_document(&document).await?;

        let service = self.clone();
        let task_document = document.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let task_document_id = task_document.id;
            tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!("shutdown while ingesting document {}", task_document_id);
                }
                _ = service.process(task_document, bytes, kb) => {}
            }
        });

        Ok(document)
    }

    async fn process(&self, document: Document, bytes: Vec<u8>, kb: KnowledgeBase) {
        if let Err(e) = self
            .repo
            .update_document_status(document.id, DocumentStatus::Processing, None)
            .await
        {
            error!("update document status error: {}", e);
            return;
        }

        match self.index_document(&document, &bytes, &kb).await {
            Ok(chunk_count) => {
                if let Err(e) = self
                    .repo
                    .update_document_status(document.id, DocumentStatus::Completed, None)
                    .await
                {
                    error!("update document status error: {}", e);
                    return;
                }
                if let Err(e) = self.repo.adjust_document_count(kb.id, 1).await {
                    error!("adjust document count error: {}", e);
                }
                info!(
                    "document {} indexed with {} parent chunks",
                    document.id, chunk_count
                );
            }
            Err(e) => {
                error!("process document {} error: {}", document.id, e);
                if let Err(e) = self
                    .repo
                    .update_document_status(
                        document.id,
                        DocumentStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await
                {
                    error!("update document status error: {}", e);
                }
            }
        }
    }

    /// Chunk, embed and index one document; vectors land before the SQL
    /// parent rows so `metadata.parent_id` always resolves or the write
    /// fails as a whole.
    async fn index_document(
        &self,
        document: &Document,
        bytes: &[u8],
        kb: &KnowledgeBase,
    ) -> Result<usize> {
        let parsed = chunking::parse_document(bytes, &document.name)?;
        if parsed.is_empty() {
            warn!("document {} produced no chunks", document.id);
            return Ok(0);
        }

        let embedding = self
            .directory
            .embedding_config(
                kb.creator_id,
                &kb.embedding_model_provider,
                &kb.embedding_model_name,
            )
            .await?;
        let embedder = build_embedder(&embedding);
        let store = self.vectors.store_for(kb, embedder).await;

        let now = Utc::now();
        let mut parents = Vec::with_capacity(parsed.len());
        let mut children = Vec::new();
        for (index, chunk) in parsed.into_iter().enumerate() {
            let parent_id = Uuid::new_v4();
            let mut metadata = chunk.metadata;
            metadata.insert("doc_name".to_string(), json!(document.name));
            metadata.insert("file_type".to_string(), json!(document.file_type));

            let mut first_child_id = String::new();
            for child in &chunk.children {
                let child_id = Uuid::new_v4().to_string();
                if first_child_id.is_empty() {
                    first_child_id = child_id.clone();
                }
                children.push(ChildDocument {
                    id: child_id,
                    parent_id: parent_id.to_string(),
                    doc_id: document.id.to_string(),
                    content: child.clone(),
                    metadata: metadata.clone(),
                });
            }

            parents.push(DocumentChunk {
                id: parent_id,
                document_id: document.id,
                kb_id: kb.id,
                es_id: first_child_id,
                chunk_index: index as i32,
                token_count: count_tokens(&chunk.content) as i32,
                content: chunk.content,
                meta_info: metadata,
                status: ChunkStatus::Embedded,
                created_at: now,
                updated_at: now,
            });
        }

        store.store(&children).await?;
        self.repo.create_document_chunks(&parents).await?;
        Ok(parents.len())
    }

    /// Transactionally remove the document row, its parent chunks and its
    /// vector rows. Deleting an already-deleted document succeeds.
    pub async fn delete_document(&self, kb_id: Uuid, user_id: Uuid, document_id: Uuid) -> Result<()> {
        let kb = self
            .repo
            .get_knowledge_base(kb_id, user_id)
            .await?
            .ok_or(PlatformError::KnowledgeBaseNotFound)?;
        let Some(_document) = self.repo.get_document(user_id, kb_id, document_id).await? else {
            return Ok(());
        };

        // the embedder is unused on the delete path; resolve it when we can
        // so the cached store stays usable for later writes
        let embedder: Arc<dyn Embedder> = match self
            .directory
            .embedding_config(
                kb.creator_id,
                &kb.embedding_model_provider,
                &kb.embedding_model_name,
            )
            .await
        {
            Ok(config) => build_embedder(&config),
            Err(_) => Arc::new(UnresolvedEmbedder),
        };
        let store = self.vectors.store_for(&kb, embedder).await;

        let mut tx = self.repo.begin().await?;
        self.repo
            .delete_document_row(&mut tx, user_id, kb_id, document_id)
            .await?;
        self.repo
            .delete_document_chunk_rows(&mut tx, kb_id, document_id)
            .await?;
        store.delete_by_doc_id(&document_id.to_string()).await?;
        tx.commit().await?;

        self.repo.adjust_document_count(kb_id, -1).await?;
        info!("document {} deleted from kb {}", document_id, kb_id);
        Ok(())
    }
}

/// Placeholder embedder for paths that never embed (deletes); any actual
/// embedding attempt reports a configuration failure.
struct UnresolvedEmbedder;

#[async_trait]
impl Embedder for UnresolvedEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(LlmError::EmbeddingFailed("embedding model not resolved".to_string()).into())
    }
}
