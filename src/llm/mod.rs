//! Chat model integration
//!
//! One trait covers the providers the platform talks to: `ollama` through
//! its native chat API, `openai` and `qwen` (and anything else) through
//! the OpenAI-compatible protocol. Streaming yields incremental events the
//! agent runner forwards to the client; tool call requests are assembled
//! from the stream and handed back for the tool loop.

mod ollama;
mod openai;
pub(crate) mod sse;

pub use ollama::OllamaChatModel;
pub use openai::OpenAiChatModel;

use crate::error::Result;
use crate::models::{ModelParameters, ProviderConfig};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_call_id: None,
            tool_calls: calls,
        }
    }

    /// Tool result message answering a specific tool call
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// A tool advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the parameters
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments string
    pub arguments: String,
}

/// Incremental event from a streaming chat completion
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Visible answer delta
    Content(String),
    /// Reasoning/thinking delta
    Reasoning(String),
    /// The model finished this turn by requesting tool invocations
    ToolCalls(Vec<ToolCallRequest>),
}

/// Stream of chat events; ends after the final event of the turn
pub type ChatStream = BoxStream<'static, Result<ChatEvent>>;

/// Trait for chat model operations
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Blocking completion returning the full answer text
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Streaming completion with optional tool advertising
    async fn stream_chat(&self, messages: Vec<ChatMessage>, tools: Vec<ToolSpec>)
        -> Result<ChatStream>;
}

/// Build the chat model for a provider config. `ollama` gets the native
/// client; `openai`, `qwen` and unrecognized providers all speak the
/// OpenAI-compatible protocol against their own base URL.
pub fn build_chat_model(
    provider: &ProviderConfig,
    model: &str,
    params: &ModelParameters,
) -> Arc<dyn ChatModel> {
    match provider.provider.as_str() {
        "ollama" => Arc::new(OllamaChatModel::new(
            provider.api_base.clone(),
            model.to_string(),
            params.clone(),
        )),
        // openai and qwen share the wire protocol; default is openai-compatible
        _ => Arc::new(OpenAiChatModel::new(
            provider.api_base.clone(),
            provider.api_key.clone(),
            model.to_string(),
            params.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = ChatMessage::system("be helpful");
        assert_eq!(msg.role, Role::System);
        assert!(msg.tool_calls.is_empty());

        let tool_msg = ChatMessage::tool("call-1", "result");
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn test_build_dispatch() {
        let params = ModelParameters::default();
        let ollama = ProviderConfig {
            provider: "ollama".to_string(),
            api_base: "http://localhost:11434".to_string(),
            api_key: String::new(),
        };
        let qwen = ProviderConfig {
            provider: "qwen".to_string(),
            api_base: "https://dashscope.example.com/v1".to_string(),
            api_key: "key".to_string(),
        };
        // both build without error; concrete types differ by protocol
        let _ = build_chat_model(&ollama, "llama3.2", &params);
        let _ = build_chat_model(&qwen, "qwen-max", &params);
    }
}
