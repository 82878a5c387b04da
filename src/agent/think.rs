use super::LocalTool;
use async_trait::async_trait;
use serde_json::json;

/// Lets the model write down its reasoning as a tool call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThinkTool;

#[async_trait]
impl LocalTool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Think through a problem step by step"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "The reasoning to record."
                }
            },
            "required": ["thought"]
        })
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let thought = args["thought"].as_str().unwrap_or_default();
        Ok(json!({ "result": format!("I thought about: {thought}") }))
    }
}
