use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// MCP protocol revision the bundled echo server falls back to.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// A tool as advertised by a server in `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
    #[serde(rename = "outputSchema", default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl From<rmcp::model::Tool> for ToolDescriptor {
    fn from(tool: rmcp::model::Tool) -> Self {
        Self {
            name: tool.name.into_owned(),
            title: tool.title,
            description: tool.description.map(std::borrow::Cow::into_owned),
            input_schema: Value::Object(Arc::unwrap_or_clone(tool.input_schema)),
            output_schema: tool
                .output_schema
                .map(|schema| Value::Object(Arc::unwrap_or_clone(schema))),
        }
    }
}

/// A catalog entry tagged with the server that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTool {
    pub server: String,
    #[serde(flatten)]
    pub tool: ToolDescriptor,
}

impl ServerTool {
    /// Composite `server:tool` identifier.
    pub fn id(&self) -> String {
        format!("{}:{}", self.server, self.tool.name)
    }
}
