//! Native Ollama chat client
//!
//! Ollama streams NDJSON rather than SSE, and returns tool calls whole
//! with object arguments instead of accumulated string deltas.

use super::{ChatEvent, ChatMessage, ChatModel, ChatStream, Role, ToolCallRequest, ToolSpec};
use crate::error::{LlmError, Result};
use crate::models::ModelParameters;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

pub struct OllamaChatModel {
    client: reqwest::Client,
    api_base: String,
    model: String,
    params: ModelParameters,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    options: WireOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
}

#[derive(Debug, Serialize)]
struct WireOptions {
    temperature: f32,
    top_p: f32,
    num_ctx: u32,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    message: Option<WireChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireToolFunction,
}

#[derive(Debug, Deserialize)]
struct WireToolFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl OllamaChatModel {
    pub fn new(api_base: String, model: String, params: ModelParameters) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base,
            model,
            params,
        }
    }

    fn url(&self) -> String {
        format!("{}/api/chat", self.api_base.trim_end_matches('/'))
    }

    fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                },
                content: m.content.clone(),
            })
            .collect()
    }

    async fn send<'a>(&self, request: &WireRequest<'a>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url())
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;
        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::GenerationFailed(error_text).into());
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!("Generating completion with ollama model {}", self.model);
        let request = WireRequest {
            model: &self.model,
            messages: Self::wire_messages(messages),
            stream: false,
            options: WireOptions {
                temperature: self.params.temperature,
                top_p: self.params.top_p,
                num_ctx: self.params.max_tokens,
            },
            tools: None,
        };
        let response = self.send(&request).await?;
        let chunk: WireChunk = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        if let Some(error) = chunk.error {
            return Err(LlmError::GenerationFailed(error).into());
        }
        Ok(chunk.message.map(|m| m.content).unwrap_or_default())
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolSpec>,
    ) -> Result<ChatStream> {
        let request = WireRequest {
            model: &self.model,
            messages: Self::wire_messages(&messages),
            stream: true,
            options: WireOptions {
                temperature: self.params.temperature,
                top_p: self.params.top_p,
                num_ctx: self.params.max_tokens,
            },
            tools: if tools.is_empty() {
                None
            } else {
                Some(
                    tools
                        .iter()
                        .map(|t| WireTool {
                            kind: "function",
                            function: t,
                        })
                        .collect(),
                )
            },
        };
        let response = self.send(&request).await?;

        let stream = try_stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            let mut calls: Vec<ToolCallRequest> = Vec::new();
            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| LlmError::Stream(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let parsed: WireChunk = serde_json::from_str(line)
                        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                    if let Some(error) = parsed.error {
                        Err(LlmError::GenerationFailed(error))?;
                    }
                    if let Some(message) = parsed.message {
                        if let Some(thinking) = message.thinking {
                            if !thinking.is_empty() {
                                yield ChatEvent::Reasoning(thinking);
                            }
                        }
                        if !message.content.is_empty() {
                            yield ChatEvent::Content(message.content);
                        }
                        for tc in message.tool_calls {
                            calls.push(ToolCallRequest {
                                id: Uuid::new_v4().to_string(),
                                name: tc.function.name,
                                arguments: tc.function.arguments.to_string(),
                            });
                        }
                    }
                    if parsed.done {
                        break 'outer;
                    }
                }
            }
            if !calls.is_empty() {
                yield ChatEvent::ToolCalls(calls);
            }
        };
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_streaming_ndjson() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let model = OllamaChatModel::new(
            server.uri(),
            "llama3.2".to_string(),
            ModelParameters::default(),
        );
        let mut stream = model
            .stream_chat(vec![ChatMessage::user("hi")], Vec::new())
            .await
            .unwrap();

        let mut content = String::new();
        while let Some(event) = stream.next().await {
            if let ChatEvent::Content(c) = event.unwrap() {
                content.push_str(&c);
            }
        }
        assert_eq!(content, "Hello");
    }

    #[tokio::test]
    async fn test_generate_blocking() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "pong"},
                "done": true
            })))
            .mount(&server)
            .await;

        let model = OllamaChatModel::new(
            server.uri(),
            "llama3.2".to_string(),
            ModelParameters::default(),
        );
        let result = model.generate(&[ChatMessage::user("ping")]).await.unwrap();
        assert_eq!(result, "pong");
    }
}
