//! Row types and status enums for the metadata store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Free-form JSON metadata attached to chunks and documents
pub type Metadata = serde_json::Map<String, Value>;

/// Vector backend selector per knowledge base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Es,
    Milvus,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Es => "es",
            StorageType::Milvus => "milvus",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "milvus" => StorageType::Milvus,
            _ => StorageType::Es,
        }
    }
}

/// A container of documents owned by a creator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub name: String,
    pub description: String,
    pub chat_model_name: String,
    pub chat_model_provider: String,
    pub embedding_model_name: String,
    pub embedding_model_provider: String,
    /// Immutable after the first chunk is written
    pub embedding_dimension: i32,
    pub storage_type: StorageType,
    pub document_count: i64,
    pub tags: Vec<String>,
    pub status: KnowledgeBaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBaseStatus {
    Active,
    Disabled,
}

/// A single uploaded file within one knowledge base.
///
/// Status is a state machine owned by the ingestion orchestrator:
/// `pending → processing → {completed | failed}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub kb_id: Uuid,
    pub creator_id: Uuid,
    pub name: String,
    /// Normalized extension, e.g. "md", "pdf"
    pub file_type: String,
    pub size: i64,
    pub token_count: i32,
    /// Opaque blob-storage key; blob storage itself is out of scope
    pub storage_key: String,
    /// SHA-256 of the uploaded bytes
    pub file_hash: String,
    pub status: DocumentStatus,
    pub error_message: String,
    pub meta_info: Metadata,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => DocumentStatus::Processing,
            "completed" => DocumentStatus::Completed,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::Pending,
        }
    }
}

/// A parent chunk: a coherent semantic unit stored in SQL and surfaced to
/// the LLM as context. Parents are never embedded; child vectors reference
/// them by id from the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub kb_id: Uuid,
    /// Vector-side id of the first child, kept for surgical updates
    pub es_id: String,
    /// Dense ordinal starting at 0 within the document
    pub chunk_index: i32,
    /// Breadcrumb-prefixed content
    pub content: String,
    pub token_count: i32,
    pub meta_info: Metadata,
    pub status: ChunkStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Embedded,
    Deleted,
    Disabled,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Embedded => "embedded",
            ChunkStatus::Deleted => "deleted",
            ChunkStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "embedded" => ChunkStatus::Embedded,
            "deleted" => ChunkStatus::Deleted,
            "disabled" => ChunkStatus::Disabled,
            _ => ChunkStatus::Pending,
        }
    }
}

/// Sampling parameters applied to the agent's chat model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 4096,
        }
    }
}

/// An agent definition, read-only to the query engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub model_provider: String,
    pub model_name: String,
    pub model_parameters: ModelParameters,
    pub tool_ids: Vec<Uuid>,
    pub knowledge_base_ids: Vec<Uuid>,
}

/// Tool kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    System,
    Mcp,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::System => "system",
            ToolType::Mcp => "mcp",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "mcp" => ToolType::Mcp,
            _ => ToolType::System,
        }
    }
}

/// Connection settings for a remote MCP server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// A tool row consumed during agent execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub name: String,
    pub description: String,
    pub tool_type: ToolType,
    pub parameters_schema: Value,
    pub mcp_config: Option<McpConfig>,
    pub is_enable: bool,
}

/// LLM model kind in the provider directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    Chat,
    Embedding,
}

impl LlmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmType::Chat => "chat",
            LlmType::Embedding => "embedding",
        }
    }
}

/// Credentials and endpoint for a model provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: String,
    pub api_base: String,
    pub api_key: String,
}

/// A registered embedding model resolved for a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: ProviderConfig,
    pub model: String,
    pub dimension: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_roundtrip() {
        assert_eq!(StorageType::parse("es"), StorageType::Es);
        assert_eq!(StorageType::parse("milvus"), StorageType::Milvus);
        assert_eq!(StorageType::parse("unknown"), StorageType::Es);
        assert_eq!(StorageType::Milvus.as_str(), "milvus");
    }

    #[test]
    fn test_document_status_parse() {
        assert_eq!(DocumentStatus::parse("processing"), DocumentStatus::Processing);
        assert_eq!(DocumentStatus::parse("garbage"), DocumentStatus::Pending);
        assert_eq!(DocumentStatus::Completed.as_str(), "completed");
    }

    #[test]
    fn test_model_parameters_default() {
        let params = ModelParameters::default();
        assert!(params.temperature > 0.0);
        assert!(params.max_tokens > 0);
    }
}
