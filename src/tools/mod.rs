//! Tool set for agent execution
//!
//! Tools come in two kinds behind one invocation surface: `System` tools
//! live in-process and are registered once at boot; `Mcp` tools are
//! discovered from remote MCP servers per agent. The model sees both
//! through the same `{name, description, parameters}` spec.

mod time;

pub use time::CurrentTimeTool;

use crate::error::Result;
use crate::llm::ToolSpec;
use crate::mcp::RemoteTool;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Descriptor advertised to the model
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    /// JSON schema of the accepted arguments
    pub parameters: Value,
}

impl ToolInfo {
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// An in-process tool
#[async_trait]
pub trait SystemTool: Send + Sync {
    fn info(&self) -> ToolInfo;

    /// Run the tool with raw JSON arguments, returning its text output
    async fn invoke(&self, arguments: &str) -> Result<String>;
}

/// A tool available to one agent run
pub enum Tool {
    System(Arc<dyn SystemTool>),
    Mcp(RemoteTool),
}

impl Tool {
    pub fn info(&self) -> ToolInfo {
        match self {
            Tool::System(tool) => tool.info(),
            Tool::Mcp(tool) => tool.info(),
        }
    }

    pub async fn invoke(&self, arguments: &str) -> Result<String> {
        match self {
            Tool::System(tool) => tool.invoke(arguments).await,
            Tool::Mcp(tool) => tool.invoke(arguments).await,
        }
    }
}

/// In-process tool registry, initialized once at boot and immutable after
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn SystemTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// The default platform registry
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CurrentTimeTool));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn SystemTool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn SystemTool>> {
        self.tools.iter().find(|t| t.info().name == name).cloned()
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools.iter().map(|t| t.info()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_find() {
        let registry = ToolRegistry::with_builtin_tools();
        assert!(registry.find("current_time").is_some());
        assert!(registry.find("no_such_tool").is_none());
    }

    #[tokio::test]
    async fn test_system_tool_through_sum_type() {
        let registry = ToolRegistry::with_builtin_tools();
        let tool = Tool::System(registry.find("current_time").unwrap());
        assert_eq!(tool.info().name, "current_time");
        let output = tool.invoke("{}").await.unwrap();
        assert!(!output.is_empty());
    }
}
