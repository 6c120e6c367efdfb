//! Model Context Protocol (MCP) client
//!
//! Connects to remote MCP servers over two transports: SSE when the
//! configured URL ends with `/sse`, streamable HTTP otherwise. The client
//! advertises the latest protocol version on initialize, lists the
//! server's tools, and invokes them on behalf of the agent.

use crate::error::{McpError, Result};
use crate::models::McpConfig;
use crate::tools::ToolInfo;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Latest MCP protocol revision this client speaks
pub const PROTOCOL_VERSION: &str = "2025-06-18";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Sse,
    StreamableHttp,
}

/// A tool definition listed by an MCP server
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

/// SSE session state: the message endpoint announced by the server plus
/// the long-lived event stream responses arrive on.
struct SseSession {
    endpoint: String,
    events: BoxStream<'static, (String, String)>,
}

pub struct McpClient {
    client: reqwest::Client,
    config: McpConfig,
    transport: Transport,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
    sse: Mutex<Option<SseSession>>,
}

impl McpClient {
    /// Build a client for the configured server; the transport is chosen
    /// by the URL suffix (`/sse` → SSE, otherwise streamable HTTP).
    pub fn new(config: McpConfig) -> Self {
        let transport = if config.base_url.ends_with("/sse") {
            Transport::Sse
        } else {
            Transport::StreamableHttp
        };
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            config,
            transport,
            next_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
            sse: Mutex::new(None),
        }
    }

    /// Connect, initialize and list the server's tools in one shot.
    pub async fn discover_tools(config: &McpConfig) -> Result<(Arc<McpClient>, Vec<McpToolInfo>)> {
        let client = Arc::new(McpClient::new(config.clone()));
        client.initialize().await?;
        let tools = client.list_tools().await?;
        Ok((client, tools))
    }

    async fn initialize(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": if self.config.name.is_empty() { "atheneum" } else { &self.config.name },
                "version": if self.config.version.is_empty() { "1.0.0" } else { &self.config.version },
            }
        });
        let result = self.call("initialize", params).await?;
        debug!(
            "mcp server initialized: {}",
            result["serverInfo"]["name"].as_str().unwrap_or("unknown")
        );
        self.notify("notifications/initialized", json!({})).await;
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>> {
        let result = self.call("tools/list", json!({})).await?;
        let tools: Vec<McpToolInfo> = serde_json::from_value(result["tools"].clone())
            .map_err(|e| McpError::ProtocolError(e.to_string()))?;
        Ok(tools)
    }

    /// Invoke a remote tool; text content parts are concatenated.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .call("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        let is_error = result["isError"].as_bool().unwrap_or(false);
        let text = result["content"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        if is_error {
            return Err(McpError::ToolExecutionFailed {
                tool: name.to_string(),
                reason: text,
            }
            .into());
        }
        Ok(text)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let response = match self.transport {
            Transport::StreamableHttp => self.call_streamable(&request).await?,
            Transport::Sse => self.call_sse(&request).await?,
        };
        if let Some(error) = response.error {
            return Err(
                McpError::ProtocolError(format!("{}: {}", error.code, error.message)).into(),
            );
        }
        response
            .result
            .ok_or_else(|| McpError::ProtocolError("missing result".to_string()).into())
    }

    /// Fire-and-forget notification; failures are logged only.
    async fn notify(&self, method: &str, params: Value) {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0",
            method,
            params,
        };
        let result = match self.transport {
            Transport::StreamableHttp => {
                let builder = self.authorized(self.client.post(&self.config.base_url));
                let builder = self.with_session(builder).await;
                builder
                    .header("Accept", "application/json, text/event-stream")
                    .json(&notification)
                    .send()
                    .await
                    .map(|_| ())
            }
            Transport::Sse => match self.sse.lock().await.as_ref() {
                Some(session) => {
                    let endpoint = session.endpoint.clone();
                    self.authorized(self.client.post(&endpoint))
                        .json(&notification)
                        .send()
                        .await
                        .map(|_| ())
                }
                None => Ok(()),
            },
        };
        if let Err(e) = result {
            warn!("mcp notification {} failed: {}", method, e);
        }
    }

    async fn call_streamable<'a>(&self, request: &JsonRpcRequest<'a>) -> Result<JsonRpcResponse> {
        let builder = self.authorized(self.client.post(&self.config.base_url));
        let builder = self.with_session(builder).await;
        let response = tokio::time::timeout(
            REQUEST_TIMEOUT,
            builder
                .header("Accept", "application/json, text/event-stream")
                .json(request)
                .send(),
        )
        .await
        .map_err(|_| McpError::Timeout(request.method.to_string()))?
        .map_err(|e| McpError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(McpError::ProtocolError(format!(
                "HTTP error: {}",
                response.status()
            ))
            .into());
        }
        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if content_type.starts_with("text/event-stream") {
            let mut events = event_stream(response);
            while let Some((_, data)) = events.next().await {
                if let Ok(parsed) = serde_json::from_str::<JsonRpcResponse>(&data) {
                    if parsed.id == Some(json!(request.id)) {
                        return Ok(parsed);
                    }
                }
            }
            Err(McpError::ProtocolError("stream ended without response".to_string()).into())
        } else {
            let parsed = response
                .json()
                .await
                .map_err(|e| McpError::ProtocolError(e.to_string()))?;
            Ok(parsed)
        }
    }

    async fn call_sse<'a>(&self, request: &JsonRpcRequest<'a>) -> Result<JsonRpcResponse> {
        self.ensure_sse_session().await?;
        let mut guard = self.sse.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| McpError::ConnectionFailed("no SSE session".to_string()))?;

        let post = self
            .authorized(self.client.post(&session.endpoint))
            .json(request)
            .send()
            .await
            .map_err(|e| McpError::ConnectionFailed(e.to_string()))?;
        if !post.status().is_success() {
            return Err(
                McpError::ProtocolError(format!("HTTP error: {}", post.status())).into(),
            );
        }

        let deadline = tokio::time::sleep(REQUEST_TIMEOUT);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(McpError::Timeout(request.method.to_string()).into());
                }
                event = session.events.next() => {
                    let Some((name, data)) = event else {
                        return Err(McpError::ConnectionFailed("SSE stream closed".to_string()).into());
                    };
                    if name != "message" {
                        continue;
                    }
                    if let Ok(parsed) = serde_json::from_str::<JsonRpcResponse>(&data) {
                        if parsed.id == Some(json!(request.id)) {
                            return Ok(parsed);
                        }
                    }
                }
            }
        }
    }

    /// Open the SSE stream and wait for the server's `endpoint` event
    async fn ensure_sse_session(&self) -> Result<()> {
        let mut guard = self.sse.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let response = self
            .authorized(self.client.get(&self.config.base_url))
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| McpError::ConnectionFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(McpError::ConnectionFailed(format!(
                "HTTP error: {}",
                response.status()
            ))
            .into());
        }

        let mut events = event_stream(response);
        let endpoint = tokio::time::timeout(REQUEST_TIMEOUT, async {
            while let Some((name, data)) = events.next().await {
                if name == "endpoint" {
                    return Some(data);
                }
            }
            None
        })
        .await
        .map_err(|_| McpError::Timeout("endpoint event".to_string()))?
        .ok_or_else(|| McpError::ConnectionFailed("no endpoint event".to_string()))?;

        let endpoint = resolve_endpoint(&self.config.base_url, &endpoint);
        debug!("mcp sse endpoint: {}", endpoint);
        *guard = Some(SseSession { endpoint, events });
        Ok(())
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.config.token)
        }
    }

    async fn with_session(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.session_id.lock().await.as_deref() {
            Some(session) => builder.header("mcp-session-id", session),
            None => builder,
        }
    }
}

/// A single remote tool bound to its client connection
pub struct RemoteTool {
    client: Arc<McpClient>,
    tool: McpToolInfo,
}

impl RemoteTool {
    pub fn new(client: Arc<McpClient>, tool: McpToolInfo) -> Self {
        Self { client, tool }
    }

    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.tool.name.clone(),
            description: self.tool.description.clone(),
            parameters: if self.tool.input_schema.is_null() {
                json!({"type": "object", "properties": {}})
            } else {
                self.tool.input_schema.clone()
            },
        }
    }

    pub async fn invoke(&self, arguments: &str) -> Result<String> {
        let arguments: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
        self.client.call_tool(&self.tool.name, arguments).await
    }
}

/// Parse an SSE response body into `(event, data)` pairs. Multi-line data
/// fields are joined with newlines; the default event name is `message`.
fn event_stream(response: reqwest::Response) -> BoxStream<'static, (String, String)> {
    let stream = async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer = String::new();
        let mut event = String::from("message");
        let mut data: Vec<String> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            let Ok(chunk) = chunk else { break };
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let line = line.trim_end_matches(['\n', '\r']);
                if line.is_empty() {
                    if !data.is_empty() {
                        yield (
                            std::mem::replace(&mut event, String::from("message")),
                            data.join("\n"),
                        );
                        data.clear();
                    }
                    continue;
                }
                if let Some(value) = line.strip_prefix("event:") {
                    event = value.trim().to_string();
                } else if let Some(value) = line.strip_prefix("data:") {
                    data.push(value.trim_start().to_string());
                }
            }
        }
        if !data.is_empty() {
            yield (event, data.join("\n"));
        }
    };
    stream.boxed()
}

fn resolve_endpoint(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    // endpoint is a path relative to the server origin
    match reqwest::Url::parse(base_url) {
        Ok(base) => base
            .join(endpoint)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| endpoint.to_string()),
        Err(_) => endpoint.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_transport_selection() {
        let sse = McpClient::new(McpConfig {
            base_url: "http://localhost:3000/sse".to_string(),
            ..Default::default()
        });
        assert_eq!(sse.transport, Transport::Sse);

        let http = McpClient::new(McpConfig {
            base_url: "http://localhost:3000/mcp".to_string(),
            ..Default::default()
        });
        assert_eq!(http.transport, Transport::StreamableHttp);
    }

    #[test]
    fn test_resolve_endpoint() {
        assert_eq!(
            resolve_endpoint("http://localhost:3000/sse", "/messages?sid=1"),
            "http://localhost:3000/messages?sid=1"
        );
        assert_eq!(
            resolve_endpoint("http://localhost:3000/sse", "http://other/m"),
            "http://other/m"
        );
    }

    #[tokio::test]
    async fn test_streamable_http_discovery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(body_partial_json(json!({"method": "initialize"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": {"protocolVersion": PROTOCOL_VERSION, "serverInfo": {"name": "test"}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(body_partial_json(json!({"method": "notifications/initialized"})))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 2,
                "result": {"tools": [
                    {"name": "lookup", "description": "Look things up",
                     "inputSchema": {"type": "object", "properties": {"q": {"type": "string"}}}}
                ]}
            })))
            .mount(&server)
            .await;

        let config = McpConfig {
            base_url: format!("{}/mcp", server.uri()),
            ..Default::default()
        };
        let (_client, tools) = McpClient::discover_tools(&config).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "lookup");
    }

    #[tokio::test]
    async fn test_tool_call_error_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": {"isError": true, "content": [{"type": "text", "text": "boom"}]}
            })))
            .mount(&server)
            .await;

        let client = McpClient::new(McpConfig {
            base_url: format!("{}/mcp", server.uri()),
            ..Default::default()
        });
        let err = client.call_tool("lookup", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "mcp_error");
    }
}
