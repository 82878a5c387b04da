//! Agent facade: one tool namespace over local tools and remote MCP tools.

mod think;

pub use think::ThinkTool;

use crate::error::{McpError, Result};
use crate::mcp::{ConnectOutcome, McpClient, ServerConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, sync::Arc};

/// Server name reported for failures of in-process tools.
pub const LOCAL_SERVER: &str = "local";

/// A tool that runs inside this process.
#[async_trait]
pub trait LocalTool: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

/// A chat model that turns a system prompt and one user message into text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

/// A parsed tool identifier: a bare local name or `server:tool`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolId {
    Local(String),
    Remote { server: String, tool: String },
}

impl ToolId {
    pub fn parse(raw: &str) -> Result<Self> {
        let not_found = || McpError::ToolNotFound {
            server: None,
            tool: raw.to_string(),
        };
        match raw.split_once(':') {
            None if raw.is_empty() => Err(not_found()),
            None => Ok(Self::Local(raw.to_string())),
            Some((server, tool)) if !server.is_empty() && !tool.is_empty() && !tool.contains(':') => {
                Ok(Self::Remote {
                    server: server.to_string(),
                    tool: tool.to_string(),
                })
            }
            Some(_) => Err(not_found()),
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(name) => f.write_str(name),
            Self::Remote { server, tool } => write!(f, "{server}:{tool}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolKind {
    Local,
    Remote { server: String },
}

/// Entry of the merged catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentTool {
    /// Identifier accepted by [`Agent::execute_tool`].
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub kind: ToolKind,
}

/// A tool invocation found in a model response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub args: Value,
}

/// Routes tool calls to local tools or to the owning MCP server.
#[derive(Debug)]
pub struct Agent {
    name: String,
    system: String,
    local_tools: Vec<Arc<dyn LocalTool>>,
    client: Arc<McpClient>,
}

impl Agent {
    pub fn new(name: impl Into<String>, system: impl Into<String>, client: Arc<McpClient>) -> Self {
        Self {
            name: name.into(),
            system: system.into(),
            local_tools: Vec::new(),
            client,
        }
    }

    /// Register a local tool. A later tool with the same name replaces the earlier one.
    pub fn with_tool(mut self, tool: Arc<dyn LocalTool>) -> Self {
        self.local_tools.retain(|t| t.name() != tool.name());
        self.local_tools.push(tool);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Arc<McpClient> {
        &self.client
    }

    /// Register a stdio server with the client and persist it. An empty
    /// `config.name` gets a generated `mcp-server-<n>` name, which is returned.
    pub async fn add_stdio_server(&self, config: ServerConfig) -> Result<String> {
        let name = if config.name.is_empty() {
            format!("mcp-server-{}", self.client.registry().await.len() + 1)
        } else {
            config.name.clone()
        };
        self.client.add_server(&name, config).await?;
        Ok(name)
    }

    /// Connect every configured server.
    pub async fn connect(&self) -> Result<Vec<ConnectOutcome>> {
        let outcomes = self.client.connect_all().await?;
        let tools = self.client.list_tools(None).await?.len();
        tracing::info!(
            name: "agent.connected",
            agent = %self.name,
            servers = self.client.list_servers().await.len(),
            remote_tools = tools,
            "Agent connected to MCP servers"
        );
        Ok(outcomes)
    }

    pub async fn disconnect(&self) {
        self.client.disconnect_all().await;
    }

    /// Local tools first, then remote tools grouped by server.
    pub async fn available_tools(&self) -> Vec<AgentTool> {
        let mut tools: Vec<AgentTool> = self
            .local_tools
            .iter()
            .map(|t| AgentTool {
                id: t.name().to_string(),
                name: t.name().to_string(),
                description: t.description().to_string(),
                kind: ToolKind::Local,
            })
            .collect();

        match self.client.list_tools(None).await {
            Ok(remote) => tools.extend(remote.into_iter().map(|t| AgentTool {
                id: t.id(),
                name: t.tool.name,
                description: t.tool.description.unwrap_or_default(),
                kind: ToolKind::Remote { server: t.server },
            })),
            Err(e) => tracing::warn!(agent = %self.name, error = %e, "Failed to list remote tools"),
        }
        tools
    }

    /// Execute a tool by identifier.
    pub async fn execute_tool(&self, id: &str, args: Value) -> Result<Value> {
        match ToolId::parse(id)? {
            ToolId::Local(name) => {
                let tool = self
                    .local_tools
                    .iter()
                    .find(|t| t.name() == name)
                    .ok_or_else(|| McpError::ToolNotFound {
                        server: None,
                        tool: name.clone(),
                    })?;
                tracing::debug!(name: "agent.tool.local", tool = %name, "Executing local tool");
                tool.call(args).await.map_err(|e| McpError::ToolExecution {
                    server: LOCAL_SERVER.to_string(),
                    tool: name,
                    code: None,
                    message: format!("{e:#}"),
                })
            }
            ToolId::Remote { server, tool } => self.client.call_tool(&server, &tool, args).await,
        }
    }

    /// Instructions for a chat model: the agent's system text, its tools, and
    /// the JSON convention understood by [`parse_tool_call`].
    pub async fn system_prompt(&self) -> String {
        let mut listing = String::new();
        for tool in self.available_tools().await {
            let origin = match &tool.kind {
                ToolKind::Local => LOCAL_SERVER,
                ToolKind::Remote { server } => server.as_str(),
            };
            listing.push_str(&format!("- {} ({origin}): {}\n", tool.id, tool.description));
        }

        format!(
            "You are {name}, an AI assistant with access to various tools.\n\n\
             SYSTEM INSTRUCTIONS:\n{system}\n\n\
             AVAILABLE TOOLS:\n{listing}\n\
             To use a tool, respond with JSON in the following format:\n\
             ```json\n{{\n  \"tool\": \"tool_id\",\n  \"args\": {{\n    \"arg1\": \"value1\"\n  }}\n}}\n```\n\n\
             If you don't need to use a tool, simply respond with normal text.\n",
            name = self.name,
            system = self.system,
        )
    }

    /// Answer `input` with one model round, running at most one tool.
    ///
    /// The model sees [`Agent::system_prompt`] and `input`. A plain-text reply
    /// is returned as is. A reply carrying a tool call runs the tool, and the
    /// model's answer to [`tool_result_message`] is returned instead; a tool
    /// failure is reported to the model rather than to the caller.
    pub async fn process(&self, input: &str, backend: &dyn CompletionBackend) -> anyhow::Result<String> {
        let system = self.system_prompt().await;
        let response = backend.complete(&system, input).await?;

        let Some(call) = parse_tool_call(&response) else {
            return Ok(response);
        };
        tracing::info!(name: "agent.tool.requested", agent = %self.name, tool = %call.tool, "Model requested a tool");
        let result = self.execute_tool(&call.tool, call.args).await;
        if let Err(e) = &result {
            tracing::warn!(agent = %self.name, tool = %call.tool, kind = e.kind(), error = %e, "Tool execution failed");
        }

        backend.complete(&system, &tool_result_message(&result)).await
    }
}

/// Find a tool call in a model response: the first ```` ```json ```` block, or
/// the whole response when it is a bare JSON object.
pub fn parse_tool_call(response: &str) -> Option<ToolCall> {
    let candidate = match response.split_once("```json") {
        Some((_, rest)) => rest.split("```").next().unwrap_or(rest).trim(),
        None => {
            let trimmed = response.trim();
            if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
                return None;
            }
            trimmed
        }
    };
    serde_json::from_str(candidate).ok()
}

/// Text fed back to the model after a tool ran.
pub fn tool_result_message(result: &Result<Value>) -> String {
    match result {
        Ok(Value::Object(map)) if map.get("isError").and_then(Value::as_bool) == Some(true) => {
            format!("Tool execution result:\nERROR: {}", Value::Object(map.clone()))
        }
        Ok(Value::Object(map)) if map.contains_key("result") => {
            format!("Tool execution result:\n{}", render(&map["result"]))
        }
        Ok(value) => format!("Tool execution result:\n{}", render(value)),
        Err(e) => format!("Tool execution result:\nERROR: {e}"),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
