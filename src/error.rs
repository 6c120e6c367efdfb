//! Error handling for the knowledge platform

use thiserror::Error;

/// Result type alias for the platform
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Main error type for the platform
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Vector store error: {0}")]
    Vector(#[from] VectorError),

    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("knowledge base not found")]
    KnowledgeBaseNotFound,

    #[error("document not found")]
    DocumentNotFound,

    #[error("agent not found")]
    AgentNotFound,

    #[error("embedding config not found")]
    EmbeddingConfigNotFound,

    #[error("provider config not found")]
    ProviderConfigNotFound,

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("file load error: {0}")]
    FileLoad(String),

    #[error("retriever error: {0}")]
    Retriever(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors related to language model operations
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Timeout: operation took too long")]
    Timeout,
}

/// Errors related to the vector store backends
#[derive(Error, Debug)]
pub enum VectorError {
    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Store failed: {0}")]
    StoreFailed(String),

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Collection setup failed: {0}")]
    CollectionSetup(String),
}

/// Errors related to MCP operations
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Server connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Tool execution failed: {tool}: {reason}")]
    ToolExecutionFailed { tool: String, reason: String },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl PlatformError {
    /// Stable machine-readable code surfaced in API responses
    pub fn code(&self) -> &'static str {
        match self {
            PlatformError::Database(_) => "db_error",
            PlatformError::KnowledgeBaseNotFound => "knowledge_base_not_found",
            PlatformError::DocumentNotFound => "document_not_found",
            PlatformError::AgentNotFound => "agent_not_found",
            PlatformError::EmbeddingConfigNotFound => "embedding_config_not_found",
            PlatformError::ProviderConfigNotFound => "provider_config_not_found",
            PlatformError::ToolNotFound(_) => "tool_not_found",
            PlatformError::FileLoad(_) => "file_load_error",
            PlatformError::Retriever(_) => "retriever_error",
            PlatformError::Llm(LlmError::EmbeddingFailed(_)) => "embedding_error",
            PlatformError::Llm(_) => "llm_error",
            PlatformError::Vector(_) => "retriever_error",
            PlatformError::Mcp(_) => "mcp_error",
            PlatformError::Config(_) => "config_error",
            PlatformError::Io(_) => "io_error",
            PlatformError::Serialization(_) => "serialization_error",
            PlatformError::Http(_) => "http_error",
            PlatformError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for the non-streaming API boundary
    pub fn status(&self) -> u16 {
        match self {
            PlatformError::KnowledgeBaseNotFound
            | PlatformError::DocumentNotFound
            | PlatformError::AgentNotFound
            | PlatformError::EmbeddingConfigNotFound
            | PlatformError::ProviderConfigNotFound
            | PlatformError::ToolNotFound(_) => 404,
            PlatformError::FileLoad(_) => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let db_error = PlatformError::Database(sqlx::Error::RowNotFound);
        assert_eq!(db_error.code(), "db_error");

        let kb_error = PlatformError::KnowledgeBaseNotFound;
        assert_eq!(kb_error.code(), "knowledge_base_not_found");
        assert_eq!(kb_error.status(), 404);
    }

    #[test]
    fn test_embedding_error_code() {
        let err = PlatformError::Llm(LlmError::EmbeddingFailed("dim mismatch".to_string()));
        assert_eq!(err.code(), "embedding_error");
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn test_file_load_is_client_error() {
        let err = PlatformError::FileLoad("bad zip".to_string());
        assert_eq!(err.status(), 400);
    }
}
