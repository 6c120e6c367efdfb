//! Atheneum — multi-tenant knowledge base platform
//!
//! The core is a Retrieval-Augmented Generation pipeline with a streaming
//! agent runtime:
//! - Document ingestion turns uploads (Markdown, DOCX, PDF, HTML, EPUB,
//!   plain text) into a parent/child chunk hierarchy, embeds the children
//!   into Elasticsearch or Milvus and keeps the parents in Postgres.
//! - Agent queries run LLM-assisted intent extraction, filtered vector
//!   retrieval with child→parent promotion, then tool-augmented agent
//!   execution streamed to the client over SSE.
//!
//! # Example
//!
//! ```rust,no_run
//! use atheneum::chunking::parse_document;
//!
//! fn main() -> anyhow::Result<()> {
//!     let chunks = parse_document(b"# Guide\n## Install\nsteps", "guide.md")?;
//!     for chunk in chunks {
//!         println!("parent: {} children", chunk.children.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod chunking;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod intent;
pub mod llm;
pub mod mcp;
pub mod models;
pub mod providers;
pub mod repository;
pub mod runner;
pub mod search;
pub mod tools;
pub mod vector;

// Re-export main types
pub use api::{router, AppState};
pub use chunking::{parse_document, FileType, ParsedChunk};
pub use config::PlatformConfig;
pub use embedding::{build_embedder, Embedder, EMBEDDING_DIM};
pub use error::{LlmError, McpError, PlatformError, Result, VectorError};
pub use ingest::IngestService;
pub use intent::{extract_intent, QueryIntent};
pub use llm::{build_chat_model, ChatEvent, ChatMessage, ChatModel, ToolCallRequest, ToolSpec};
pub use mcp::{McpClient, McpToolInfo, RemoteTool};
pub use models::{
    Agent, Document, DocumentChunk, DocumentStatus, KnowledgeBase, Metadata, ModelParameters,
    ProviderConfig, StorageType, ToolRecord, ToolType,
};
pub use providers::{ProviderDirectory, SqlProviderDirectory};
pub use repository::Repository;
pub use runner::{AgentMessage, AgentMessageRequest, AgentRunner};
pub use search::{promote, SearchResponse, SearchResult, SearchService};
pub use tools::{SystemTool, Tool, ToolInfo, ToolRegistry};
pub use vector::{ChildDocument, ScoredChild, SearchFilter, VectorStore, VectorStoreRouter};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
