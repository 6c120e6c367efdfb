//! OpenAI-compatible chat client
//!
//! Serves the `openai` and `qwen` providers and the default path for any
//! other vendor exposing `/chat/completions`. Streaming tool-call deltas
//! are assembled by index until the stream ends.

use super::sse;
use super::{ChatEvent, ChatMessage, ChatModel, ChatStream, Role, ToolCallRequest, ToolSpec};
use crate::error::{LlmError, Result};
use crate::models::ModelParameters;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub struct OpenAiChatModel {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    params: ModelParameters,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
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
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl OpenAiChatModel {
    pub fn new(api_base: String, api_key: String, model: String, params: ModelParameters) -> Self {
        let client = reqwest::Client::new();
        Self {
            client,
            api_base,
            api_key,
            model,
            params,
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
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
                tool_call_id: m.tool_call_id.clone(),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|c| WireToolCall {
                                id: c.id.clone(),
                                kind: "function".to_string(),
                                function: WireFunction {
                                    name: c.name.clone(),
                                    arguments: c.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
            })
            .collect()
    }

    async fn send<'a>(&self, request: &WireRequest<'a>) -> Result<reqwest::Response> {
        let mut http_request = self.client.post(self.url()).json(request);
        if !self.api_key.is_empty() {
            http_request = http_request.bearer_auth(&self.api_key);
        }
        let response = http_request
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
impl ChatModel for OpenAiChatModel {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!("Generating completion with {}", self.model);
        let request = WireRequest {
            model: &self.model,
            messages: Self::wire_messages(messages),
            stream: false,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            max_tokens: self.params.max_tokens,
            tools: None,
        };
        let response = self.send(&request).await?;
        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(content)
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
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            max_tokens: self.params.max_tokens,
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
        let mut data = sse::data_events(response);

        let stream = try_stream! {
            // tool call fragments accumulate per choice index until [DONE]
            let mut pending: BTreeMap<u32, ToolCallRequest> = BTreeMap::new();
            while let Some(payload) = data.next().await {
                let payload = payload?;
                if payload == "[DONE]" {
                    break;
                }
                let chunk: StreamChunk = serde_json::from_str(&payload)
                    .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                if let Some(error) = chunk.error {
                    Err(LlmError::GenerationFailed(error.to_string()))?;
                }
                for choice in chunk.choices {
                    let Some(delta) = choice.delta else { continue };
                    if let Some(reasoning) = delta.reasoning_content {
                        if !reasoning.is_empty() {
                            yield ChatEvent::Reasoning(reasoning);
                        }
                    }
                    if let Some(content) = delta.content {
                        if !content.is_empty() {
                            yield ChatEvent::Content(content);
                        }
                    }
                    for tc in delta.tool_calls.unwrap_or_default() {
                        let entry = pending.entry(tc.index).or_insert_with(|| ToolCallRequest {
                            id: String::new(),
                            name: String::new(),
                            arguments: String::new(),
                        });
                        if let Some(id) = tc.id {
                            entry.id = id;
                        }
                        if let Some(function) = tc.function {
                            if let Some(name) = function.name {
                                entry.name.push_str(&name);
                            }
                            if let Some(arguments) = function.arguments {
                                entry.arguments.push_str(&arguments);
                            }
                        }
                    }
                }
            }
            if !pending.is_empty() {
                yield ChatEvent::ToolCalls(pending.into_values().collect());
            }
        };
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model(server_uri: &str) -> OpenAiChatModel {
        OpenAiChatModel::new(
            format!("{}/v1", server_uri),
            "test-key".to_string(),
            "gpt-test".to_string(),
            ModelParameters::default(),
        )
    }

    #[tokio::test]
    async fn test_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "pong"}}]
            })))
            .mount(&server)
            .await;

        let result = model(&server.uri())
            .generate(&[ChatMessage::user("ping")])
            .await
            .unwrap();
        assert_eq!(result, "pong");
    }

    #[tokio::test]
    async fn test_stream_content_and_tool_calls() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"thinking\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"function\":{\"name\":\"get_\",\"arguments\":\"{\\\"a\\\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"name\":\"time\",\"arguments\":\":1}\"}}]}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let mut stream = model(&server.uri())
            .stream_chat(vec![ChatMessage::user("hi")], Vec::new())
            .await
            .unwrap();

        let mut content = String::new();
        let mut reasoning = String::new();
        let mut calls = Vec::new();
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                ChatEvent::Content(c) => content.push_str(&c),
                ChatEvent::Reasoning(r) => reasoning.push_str(&r),
                ChatEvent::ToolCalls(c) => calls = c,
            }
        }
        assert_eq!(content, "Hello");
        assert_eq!(reasoning, "thinking");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_time");
        assert_eq!(calls[0].arguments, "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_http_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = model(&server.uri())
            .generate(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "llm_error");
    }
}
