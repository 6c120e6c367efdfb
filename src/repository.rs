//! Postgres metadata store
//!
//! Owns the knowledge base, document and chunk tables plus the read-only
//! agent/tool lookups the query engine consumes. Multi-table document
//! deletion runs inside a single transaction; chunk deletes are hard
//! deletes so no orphan vectors can survive.

use crate::error::Result;
use crate::models::{
    Agent, ChunkStatus, Document, DocumentChunk, DocumentStatus, KnowledgeBase,
    KnowledgeBaseStatus, McpConfig, Metadata, StorageType, ToolRecord, ToolType,
};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Create the platform tables when they do not exist yet
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing metadata store schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_bases (
                id UUID PRIMARY KEY,
                creator_id UUID NOT NULL,
                name VARCHAR(255) NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                chat_model_name VARCHAR(255) NOT NULL DEFAULT '',
                chat_model_provider VARCHAR(50) NOT NULL DEFAULT '',
                embedding_model_name VARCHAR(255) NOT NULL DEFAULT '',
                embedding_model_provider VARCHAR(50) NOT NULL DEFAULT '',
                embedding_dimension INTEGER NOT NULL DEFAULT 768,
                storage_type VARCHAR(50) NOT NULL DEFAULT 'es',
                document_count BIGINT NOT NULL DEFAULT 0,
                tags TEXT[] NOT NULL DEFAULT '{}',
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_knowledge_bases_creator ON knowledge_bases(creator_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id UUID PRIMARY KEY,
                kb_id UUID NOT NULL,
                creator_id UUID NOT NULL,
                name VARCHAR(255) NOT NULL,
                file_type VARCHAR(50) NOT NULL DEFAULT '',
                size BIGINT NOT NULL DEFAULT 0,
                token_count INTEGER NOT NULL DEFAULT 0,
                storage_key VARCHAR(512) NOT NULL DEFAULT '',
                file_hash VARCHAR(64) NOT NULL DEFAULT '',
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                error_message TEXT NOT NULL DEFAULT '',
                meta_info JSONB NOT NULL DEFAULT '{}',
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_kb ON documents(kb_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_chunks (
                id UUID PRIMARY KEY,
                document_id UUID NOT NULL,
                kb_id UUID NOT NULL,
                es_id VARCHAR(100) NOT NULL DEFAULT '',
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                token_count INTEGER NOT NULL DEFAULT 0,
                meta_info JSONB NOT NULL DEFAULT '{}',
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_document_chunks_document ON document_chunks(document_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_document_chunks_kb ON document_chunks(kb_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id UUID PRIMARY KEY,
                creator_id UUID NOT NULL,
                name VARCHAR(255) NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                system_prompt TEXT NOT NULL DEFAULT '',
                model_provider VARCHAR(50) NOT NULL DEFAULT '',
                model_name VARCHAR(255) NOT NULL DEFAULT '',
                model_parameters JSONB NOT NULL DEFAULT '{}',
                tool_ids UUID[] NOT NULL DEFAULT '{}',
                knowledge_base_ids UUID[] NOT NULL DEFAULT '{}',
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tools (
                id UUID PRIMARY KEY,
                creator_id UUID NOT NULL,
                name VARCHAR(255) NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                tool_type VARCHAR(20) NOT NULL DEFAULT 'system',
                parameters_schema JSONB NOT NULL DEFAULT '{}',
                mcp_config JSONB,
                is_enable BOOLEAN NOT NULL DEFAULT TRUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS provider_configs (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                provider VARCHAR(50) NOT NULL,
                api_base VARCHAR(512) NOT NULL DEFAULT '',
                api_key VARCHAR(512) NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS llms (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                provider VARCHAR(50) NOT NULL,
                name VARCHAR(255) NOT NULL,
                model_type VARCHAR(20) NOT NULL DEFAULT 'chat',
                dimension INTEGER NOT NULL DEFAULT 768
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_bases
                (id, creator_id, name, description, chat_model_name, chat_model_provider,
                 embedding_model_name, embedding_model_provider, embedding_dimension,
                 storage_type, document_count, tags, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(kb.id)
        .bind(kb.creator_id)
        .bind(&kb.name)
        .bind(&kb.description)
        .bind(&kb.chat_model_name)
        .bind(&kb.chat_model_provider)
        .bind(&kb.embedding_model_name)
        .bind(&kb.embedding_model_provider)
        .bind(kb.embedding_dimension)
        .bind(kb.storage_type.as_str())
        .bind(kb.document_count)
        .bind(&kb.tags)
        .bind(match kb.status {
            KnowledgeBaseStatus::Active => "active",
            KnowledgeBaseStatus::Disabled => "disabled",
        })
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_knowledge_base(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<KnowledgeBase>> {
        let row = sqlx::query("SELECT * FROM knowledge_bases WHERE id = $1 AND creator_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(kb_from_row))
    }

    /// Maintain the denormalized document count on completion/delete
    pub async fn adjust_document_count(&self, kb_id: Uuid, delta: i64) -> Result<()> {
        sqlx::query(
            "UPDATE knowledge_bases SET document_count = GREATEST(document_count + $2, 0), updated_at = now() WHERE id = $1",
        )
        .bind(kb_id)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, kb_id, creator_id, name, file_type, size, token_count,
                 storage_key, file_hash, status, error_message, meta_info, enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(doc.id)
        .bind(doc.kb_id)
        .bind(doc.creator_id)
        .bind(&doc.name)
        .bind(&doc.file_type)
        .bind(doc.size)
        .bind(doc.token_count)
        .bind(&doc.storage_key)
        .bind(&doc.file_hash)
        .bind(doc.status.as_str())
        .bind(&doc.error_message)
        .bind(Value::Object(doc.meta_info.clone()))
        .bind(doc.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(
        &self,
        user_id: Uuid,
        kb_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT * FROM documents WHERE id = $1 AND creator_id = $2 AND kb_id = $3",
        )
        .bind(document_id)
        .bind(user_id)
        .bind(kb_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(doc_from_row))
    }

    /// Durable status transition; every transition lands before further work
    pub async fn update_document_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET status = $2, error_message = COALESCE($3, error_message), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_document_chunks(&self, chunks: &[DocumentChunk]) -> Result<()> {
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO document_chunks
                    (id, document_id, kb_id, es_id, chunk_index, content,
                     token_count, meta_info, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(chunk.id)
            .bind(chunk.document_id)
            .bind(chunk.kb_id)
            .bind(&chunk.es_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(chunk.token_count)
            .bind(Value::Object(chunk.meta_info.clone()))
            .bind(chunk.status.as_str())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Load chunks by id, re-sorted to the caller's id order (SQL `IN` gives
    /// no ordering guarantee and promotion order must survive).
    pub async fn get_chunks_by_ids(&self, ids: &[Uuid]) -> Result<Vec<DocumentChunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT * FROM document_chunks WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        let chunks: Vec<DocumentChunk> = rows.into_iter().map(chunk_from_row).collect();
        Ok(order_by_ids(chunks, ids))
    }

    pub async fn delete_document_row(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        user_id: Uuid,
        kb_id: Uuid,
        document_id: Uuid,
    ) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE id = $1 AND creator_id = $2 AND kb_id = $3")
            .bind(document_id)
            .bind(user_id)
            .bind(kb_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn delete_document_chunk_rows(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        kb_id: Uuid,
        document_id: Uuid,
    ) -> Result<()> {
        sqlx::query("DELETE FROM document_chunks WHERE document_id = $1 AND kb_id = $2")
            .bind(document_id)
            .bind(kb_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn get_agent(&self, user_id: Uuid, id: Uuid) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = $1 AND creator_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(agent_from_row))
    }

    pub async fn get_tools_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ToolRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT * FROM tools WHERE id = ANY($1) AND is_enable = TRUE")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(tool_from_row).collect())
    }
}

/// Re-sort `chunks` to match the order of `ids`; unknown ids are skipped.
pub(crate) fn order_by_ids(chunks: Vec<DocumentChunk>, ids: &[Uuid]) -> Vec<DocumentChunk> {
    let mut by_id: std::collections::HashMap<Uuid, DocumentChunk> =
        chunks.into_iter().map(|c| (c.id, c)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

fn json_object(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

fn kb_from_row(row: PgRow) -> KnowledgeBase {
    let status: String = row.get("status");
    KnowledgeBase {
        id: row.get("id"),
        creator_id: row.get("creator_id"),
        name: row.get("name"),
        description: row.get("description"),
        chat_model_name: row.get("chat_model_name"),
        chat_model_provider: row.get("chat_model_provider"),
        embedding_model_name: row.get("embedding_model_name"),
        embedding_model_provider: row.get("embedding_model_provider"),
        embedding_dimension: row.get("embedding_dimension"),
        storage_type: StorageType::parse(row.get::<String, _>("storage_type").as_str()),
        document_count: row.get("document_count"),
        tags: row.get("tags"),
        status: if status == "disabled" {
            KnowledgeBaseStatus::Disabled
        } else {
            KnowledgeBaseStatus::Active
        },
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn doc_from_row(row: PgRow) -> Document {
    Document {
        id: row.get("id"),
        kb_id: row.get("kb_id"),
        creator_id: row.get("creator_id"),
        name: row.get("name"),
        file_type: row.get("file_type"),
        size: row.get("size"),
        token_count: row.get("token_count"),
        storage_key: row.get("storage_key"),
        file_hash: row.get("file_hash"),
        status: DocumentStatus::parse(row.get::<String, _>("status").as_str()),
        error_message: row.get("error_message"),
        meta_info: json_object(row.get("meta_info")),
        enabled: row.get("enabled"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn chunk_from_row(row: PgRow) -> DocumentChunk {
    DocumentChunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        kb_id: row.get("kb_id"),
        es_id: row.get("es_id"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        token_count: row.get("token_count"),
        meta_info: json_object(row.get("meta_info")),
        status: ChunkStatus::parse(row.get::<String, _>("status").as_str()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn agent_from_row(row: PgRow) -> Agent {
    let params: Value = row.get("model_parameters");
    Agent {
        id: row.get("id"),
        creator_id: row.get("creator_id"),
        name: row.get("name"),
        description: row.get("description"),
        system_prompt: row.get("system_prompt"),
        model_provider: row.get("model_provider"),
        model_name: row.get("model_name"),
        model_parameters: serde_json::from_value(params).unwrap_or_default(),
        tool_ids: row.get("tool_ids"),
        knowledge_base_ids: row.get("knowledge_base_ids"),
    }
}

fn tool_from_row(row: PgRow) -> ToolRecord {
    let mcp_config: Option<Value> = row.get("mcp_config");
    ToolRecord {
        id: row.get("id"),
        creator_id: row.get("creator_id"),
        name: row.get("name"),
        description: row.get("description"),
        tool_type: ToolType::parse(row.get::<String, _>("tool_type").as_str()),
        parameters_schema: row.get("parameters_schema"),
        mcp_config: mcp_config.and_then(|v| serde_json::from_value::<McpConfig>(v).ok()),
        is_enable: row.get("is_enable"),
    }
}
