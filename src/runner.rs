//! Streaming agent runner
//!
//! One producer task per chat request runs the agent pipeline (load agent,
//! resolve model, assemble tools, build RAG context, drive the model/tool
//! loop) and feeds two queues: `dataQ` for client-visible JSON events and
//! `errQ` for fatal errors. The HTTP consumer multiplexes the queues with
//! a heartbeat timer into SSE frames. Every queue send races against
//! cancellation so a disconnected client tears the producer down within
//! one suspension point.

use crate::error::PlatformError;
use crate::llm::{build_chat_model, ChatEvent, ChatMessage, ToolSpec};
use crate::mcp::McpClient;
use crate::models::{Agent, LlmType, ToolType};
use crate::providers::ProviderDirectory;
use crate::repository::Repository;
use crate::search::SearchService;
use crate::tools::{Tool, ToolRegistry};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Upper bound on model→tool→model rounds per request
const MAX_TOOL_ROUNDS: usize = 5;

/// Queue capacity for data events
const DATA_QUEUE_SIZE: usize = 32;

/// Chat request body
#[derive(Debug, Clone, Deserialize)]
pub struct AgentMessageRequest {
    #[serde(rename = "agentId")]
    pub agent_id: Uuid,
    pub message: String,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// The JSON payload of every data event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub action: String,
    #[serde(rename = "agentName")]
    pub agent_name: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    #[serde(rename = "isErr")]
    pub is_err: bool,
    pub content: String,
    #[serde(rename = "reasoningContent")]
    pub reasoning_content: String,
}

const ACTION_AGENT_ANSWER: &str = "agent_answer";

impl AgentMessage {
    pub fn build(agent_name: &str, tool_name: &str, content: &str) -> String {
        let msg = AgentMessage {
            action: ACTION_AGENT_ANSWER.to_string(),
            agent_name: agent_name.to_string(),
            tool_name: tool_name.to_string(),
            is_err: false,
            content: content.to_string(),
            reasoning_content: String::new(),
        };
        serde_json::to_string(&msg).unwrap_or_default()
    }

    pub fn build_reasoning(agent_name: &str, tool_name: &str, reasoning: &str) -> String {
        let msg = AgentMessage {
            action: ACTION_AGENT_ANSWER.to_string(),
            agent_name: agent_name.to_string(),
            tool_name: tool_name.to_string(),
            is_err: false,
            content: String::new(),
            reasoning_content: reasoning.to_string(),
        };
        serde_json::to_string(&msg).unwrap_or_default()
    }

    pub fn build_err(agent_name: &str, error: &str) -> String {
        let msg = AgentMessage {
            action: ACTION_AGENT_ANSWER.to_string(),
            agent_name: agent_name.to_string(),
            tool_name: String::new(),
            is_err: true,
            content: error.to_string(),
            reasoning_content: String::new(),
        };
        serde_json::to_string(&msg).unwrap_or_default()
    }
}

/// Fixed system template; slots are filled per request
const BASE_SYSTEM_PROMPT: &str = r#"{role}

【 你可以使用以下工具 】
{toolsInfo}

【 可协作的智能体 】
{agentsInfo}

{ragContext}"#;

pub fn format_system_prompt(
    role: &str,
    rag_context: &str,
    tools_info: &str,
    agents_info: &str,
) -> String {
    BASE_SYSTEM_PROMPT
        .replace("{role}", role)
        .replace("{ragContext}", rag_context)
        .replace("{toolsInfo}", tools_info)
        .replace("{agentsInfo}", agents_info)
}

#[derive(Clone)]
pub struct AgentRunner {
    repo: Repository,
    directory: Arc<dyn ProviderDirectory>,
    registry: Arc<ToolRegistry>,
    search: Arc<SearchService>,
}

impl AgentRunner {
    pub fn new(
        repo: Repository,
        directory: Arc<dyn ProviderDirectory>,
        registry: Arc<ToolRegistry>,
        search: Arc<SearchService>,
    ) -> Self {
        Self {
            repo,
            directory,
            registry,
            search,
        }
    }

    /// Spawn the producer task. The returned receivers are the data and
    /// error queues; both close when the producer finishes. A producer
    /// panic is recovered and surfaced as a generic error on `errQ`.
    pub fn run(
        &self,
        token: CancellationToken,
        user_id: Uuid,
        request: AgentMessageRequest,
    ) -> (mpsc::Receiver<String>, mpsc::Receiver<PlatformError>) {
        let (data_tx, data_rx) = mpsc::channel::<String>(DATA_QUEUE_SIZE);
        let (err_tx, err_rx) = mpsc::channel::<PlatformError>(4);

        let runner = self.clone();
        tokio::spawn(async move {
            let produced = AssertUnwindSafe(runner.produce(
                token.clone(),
                user_id,
                request,
                data_tx.clone(),
                err_tx.clone(),
            ))
            .catch_unwind()
            .await;
            if produced.is_err() {
                error!("agent producer panicked");
                send_err(
                    &token,
                    &err_tx,
                    PlatformError::Internal("internal server error".to_string()),
                )
                .await;
            }
            // data_tx / err_tx drop here, closing both queues
        });

        (data_rx, err_rx)
    }

    async fn produce(
        &self,
        token: CancellationToken,
        user_id: Uuid,
        request: AgentMessageRequest,
        data_tx: mpsc::Sender<String>,
        err_tx: mpsc::Sender<PlatformError>,
    ) {
        let agent = match self.repo.get_agent(user_id, request.agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                send_err(&token, &err_tx, PlatformError::AgentNotFound).await;
                return;
            }
            Err(e) => {
                error!("load agent error: {}", e);
                send_err(&token, &err_tx, e).await;
                return;
            }
        };

        let provider = match self
            .directory
            .provider_config(&agent.model_provider, &agent.model_name, LlmType::Chat)
            .await
        {
            Ok(provider) => provider,
            Err(e) => {
                error!("resolve provider error: {}", e);
                send_err(&token, &err_tx, e).await;
                return;
            }
        };
        let model = build_chat_model(&provider, &agent.model_name, &agent.model_parameters);

        let tools = self.build_tools(&agent).await;
        let specs: Vec<ToolSpec> = tools.iter().map(|t| t.info().spec()).collect();

        let (rag_context, kb_names) = self.build_rag_context(&agent, user_id, &request.message).await;
        if !rag_context.is_empty() {
            // show the retrieved context to the client right away
            let msg = AgentMessage::build(&agent.name, &kb_names, &rag_context);
            if !send_data(&token, &data_tx, msg).await {
                return;
            }
        }

        let system_prompt = format_system_prompt(
            &agent.system_prompt,
            &rag_context,
            &tools_info(&tools),
            "",
        );
        let mut messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(request.message.clone()),
        ];

        for round in 0..=MAX_TOOL_ROUNDS {
            let mut stream = match model.stream_chat(messages.clone(), specs.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    let msg = AgentMessage::build_err(&agent.name, &e.to_string());
                    send_data(&token, &data_tx, msg).await;
                    return;
                }
            };

            let mut tool_calls = Vec::new();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        warn!("client cancelled the request");
                        return;
                    }
                    event = stream.next() => {
                        match event {
                            None => break,
                            Some(Err(e)) => {
                                // model-level error: report in-band and stop
                                let msg = AgentMessage::build_err(&agent.name, &e.to_string());
                                send_data(&token, &data_tx, msg).await;
                                return;
                            }
                            Some(Ok(ChatEvent::Reasoning(reasoning))) => {
                                let msg = AgentMessage::build_reasoning(&agent.name, "", &reasoning);
                                if !send_data(&token, &data_tx, msg).await {
                                    return;
                                }
                            }
                            Some(Ok(ChatEvent::Content(content))) => {
                                let msg = AgentMessage::build(&agent.name, "", &content);
                                if !send_data(&token, &data_tx, msg).await {
                                    return;
                                }
                            }
                            Some(Ok(ChatEvent::ToolCalls(calls))) => {
                                tool_calls = calls;
                            }
                        }
                    }
                }
            }

            if tool_calls.is_empty() {
                return;
            }
            if round == MAX_TOOL_ROUNDS {
                warn!("tool round limit reached for agent {}", agent.name);
                return;
            }

            messages.push(ChatMessage::assistant_tool_calls(tool_calls.clone()));
            for call in tool_calls {
                let Some(tool) = tools.iter().find(|t| t.info().name == call.name) else {
                    let msg = AgentMessage::build_err(
                        &agent.name,
                        &format!("tool not found: {}", call.name),
                    );
                    send_data(&token, &data_tx, msg).await;
                    return;
                };
                info!("invoking tool {} for agent {}", call.name, agent.name);
                match tool.invoke(&call.arguments).await {
                    Ok(output) => {
                        let msg = AgentMessage::build(&agent.name, &call.name, &output);
                        if !send_data(&token, &data_tx, msg).await {
                            return;
                        }
                        messages.push(ChatMessage::tool(call.id.clone(), output));
                    }
                    Err(e) => {
                        let msg = AgentMessage::build_err(&agent.name, &e.to_string());
                        send_data(&token, &data_tx, msg).await;
                        return;
                    }
                }
            }
        }
    }

    /// Assemble the agent's tool set. System tools come from the boot-time
    /// registry; MCP tools are discovered per server. Discovery failures
    /// are logged and skipped, never fatal.
    async fn build_tools(&self, agent: &Agent) -> Vec<Tool> {
        let records = match self.repo.get_tools_by_ids(&agent.tool_ids).await {
            Ok(records) => records,
            Err(e) => {
                warn!("load agent tools error: {}", e);
                return Vec::new();
            }
        };

        let mut tools = Vec::new();
        for record in records {
            match record.tool_type {
                ToolType::System => match self.registry.find(&record.name) {
                    Some(tool) => tools.push(Tool::System(tool)),
                    None => warn!("system tool {} not registered, skipping", record.name),
                },
                ToolType::Mcp => {
                    let Some(config) = record.mcp_config else {
                        warn!("mcp tool {} has no config, skipping", record.name);
                        continue;
                    };
                    match McpClient::discover_tools(&config).await {
                        Ok((client, remote_tools)) => {
                            for remote in remote_tools {
                                tools.push(Tool::Mcp(crate::mcp::RemoteTool::new(
                                    client.clone(),
                                    remote,
                                )));
                            }
                        }
                        Err(e) => {
                            warn!("mcp discovery failed for {}: {}", record.name, e);
                        }
                    }
                }
            }
        }
        tools
    }

    /// Retrieve context from every attached knowledge base and assemble
    /// the reference block. Returns the block and the KB name attribution.
    async fn build_rag_context(&self, agent: &Agent, user_id: Uuid, message: &str) -> (String, String) {
        let mut parents = Vec::new();
        let mut kb_names = Vec::new();
        for kb_id in &agent.knowledge_base_ids {
            match self.search.search(*kb_id, user_id, message).await {
                Ok(response) => {
                    if let Ok(Some(kb)) = self.repo.get_knowledge_base(*kb_id, user_id).await {
                        kb_names.push(kb.name);
                    }
                    parents.extend(response.results.into_iter().map(|r| r.content));
                }
                Err(e) => {
                    warn!("rag search failed for kb {}: {}", kb_id, e);
                }
            }
        }
        if parents.is_empty() {
            return (String::new(), String::new());
        }
        let mut block = String::from("【 参考以下知识库内容回答问题 】\n");
        for (i, content) in parents.iter().take(3).enumerate() {
            block.push_str(&format!("{}. {}\n", i + 1, content));
        }
        (block, kb_names.join(","))
    }
}

fn tools_info(tools: &[Tool]) -> String {
    tools
        .iter()
        .map(|t| {
            let info = t.info();
            format!(
                "- name: {}, description: {}, params: {}",
                info.name, info.description, info.parameters
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn send_data(token: &CancellationToken, tx: &mpsc::Sender<String>, data: String) -> bool {
    tokio::select! {
        _ = token.cancelled() => {
            warn!("data send cancelled");
            false
        }
        result = tx.send(data) => result.is_ok(),
    }
}

async fn send_err(
    token: &CancellationToken,
    tx: &mpsc::Sender<PlatformError>,
    error: PlatformError,
) -> bool {
    tokio::select! {
        _ = token.cancelled() => {
            warn!("error send cancelled");
            false
        }
        result = tx.send(error) => result.is_ok(),
    }
}

/// Multiplex the producer queues and a heartbeat timer into raw SSE
/// frames. Frame grammar: `data: <json>\n\n`, `: keep-alive\n\n`,
/// `data: [DONE]\n\n` on normal completion, `data: [ERROR]<msg>\n\n` on a
/// fatal error. The stream owns a drop guard: when the client goes away
/// and the body stream drops, the producer's token is cancelled.
pub fn sse_frames(
    token: CancellationToken,
    mut data_rx: mpsc::Receiver<String>,
    err_rx: mpsc::Receiver<PlatformError>,
    heartbeat: Duration,
) -> BoxStream<'static, String> {
    let stream = async_stream::stream! {
        let _guard = token.clone().drop_guard();
        let mut err_rx = Some(err_rx);
        let mut ticker = tokio::time::interval(heartbeat);
        // the first tick of an interval fires immediately
        ticker.tick().await;
        loop {
            let err_open = err_rx.is_some();
            tokio::select! {
                _ = token.cancelled() => {
                    warn!("context done, client disconnected");
                    return;
                }
                _ = ticker.tick() => {
                    yield ": keep-alive\n\n".to_string();
                }
                data = data_rx.recv() => {
                    match data {
                        Some(data) => yield format!("data: {}\n\n", data),
                        None => {
                            // dataQ closed: the producer is done
                            yield "data: [DONE]\n\n".to_string();
                            return;
                        }
                    }
                }
                err = recv_err(&mut err_rx), if err_open => {
                    match err {
                        Some(error) => {
                            yield format!("data: [ERROR]{}\n\n", error);
                            return;
                        }
                        None => {
                            // errQ closed alone never ends the stream
                            err_rx = None;
                        }
                    }
                }
            }
        }
    };
    stream.boxed()
}

async fn recv_err(err_rx: &mut Option<mpsc::Receiver<PlatformError>>) -> Option<PlatformError> {
    match err_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_message_wire_format() {
        let msg = AgentMessage::build("helper", "get_weather", "sunny");
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["action"], "agent_answer");
        assert_eq!(parsed["agentName"], "helper");
        assert_eq!(parsed["toolName"], "get_weather");
        assert_eq!(parsed["isErr"], false);
        assert_eq!(parsed["content"], "sunny");
        assert_eq!(parsed["reasoningContent"], "");
    }

    #[test]
    fn test_error_message_sets_flag() {
        let msg = AgentMessage::build_err("helper", "model exploded");
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["isErr"], true);
        assert_eq!(parsed["content"], "model exploded");
    }

    #[test]
    fn test_system_prompt_slots() {
        let prompt = format_system_prompt("you are a librarian", "CONTEXT", "TOOLS", "AGENTS");
        assert!(prompt.starts_with("you are a librarian"));
        assert!(prompt.contains("CONTEXT"));
        assert!(prompt.contains("TOOLS"));
        assert!(prompt.contains("AGENTS"));
        assert!(!prompt.contains("{role}"));
    }

    #[tokio::test]
    async fn test_frames_done_on_data_close() {
        let (data_tx, data_rx) = mpsc::channel::<String>(4);
        let (err_tx, err_rx) = mpsc::channel::<PlatformError>(4);
        let token = CancellationToken::new();
        let mut frames = sse_frames(token, data_rx, err_rx, Duration::from_secs(5));

        data_tx.send("{\"a\":1}".to_string()).await.unwrap();
        drop(data_tx);
        drop(err_tx);

        assert_eq!(frames.next().await.unwrap(), "data: {\"a\":1}\n\n");
        assert_eq!(frames.next().await.unwrap(), "data: [DONE]\n\n");
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_frames_error_terminates() {
        let (_data_tx, data_rx) = mpsc::channel::<String>(4);
        let (err_tx, err_rx) = mpsc::channel::<PlatformError>(4);
        let token = CancellationToken::new();
        let mut frames = sse_frames(token, data_rx, err_rx, Duration::from_secs(5));

        err_tx
            .send(PlatformError::Internal("boom".to_string()))
            .await
            .unwrap();

        let frame = frames.next().await.unwrap();
        assert!(frame.starts_with("data: [ERROR]"));
        assert!(frame.ends_with("\n\n"));
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_err_close_alone_keeps_stream_open() {
        let (data_tx, data_rx) = mpsc::channel::<String>(4);
        let (err_tx, err_rx) = mpsc::channel::<PlatformError>(4);
        let token = CancellationToken::new();
        let mut frames = sse_frames(token, data_rx, err_rx, Duration::from_secs(30));

        drop(err_tx);
        data_tx.send("later".to_string()).await.unwrap();

        // data still flows after errQ closed
        assert_eq!(frames.next().await.unwrap(), "data: later\n\n");
        drop(data_tx);
        assert_eq!(frames.next().await.unwrap(), "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_producer_token() {
        let (_data_tx, data_rx) = mpsc::channel::<String>(4);
        let (_err_tx, err_rx) = mpsc::channel::<PlatformError>(4);
        let token = CancellationToken::new();
        let frames = sse_frames(token.clone(), data_rx, err_rx, Duration::from_secs(5));

        assert!(!token.is_cancelled());
        drop(frames);
        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_interleaves() {
        let (data_tx, data_rx) = mpsc::channel::<String>(4);
        let (_err_tx, err_rx) = mpsc::channel::<PlatformError>(4);
        let token = CancellationToken::new();
        let mut frames = sse_frames(token, data_rx, err_rx, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(frames.next().await.unwrap(), ": keep-alive\n\n");

        data_tx.send("x".to_string()).await.unwrap();
        assert_eq!(frames.next().await.unwrap(), "data: x\n\n");
    }
}
