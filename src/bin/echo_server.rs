//! `mcp-echo-server`: a minimal stdio MCP server.
//!
//! Advertises `ping`, `echo` and `sleep`. Stdout carries the protocol; logs go
//! to stderr. When `MCP_ECHO_PIDFILE` is set, the process id is written to
//! that file on startup.

use futures::{SinkExt, StreamExt};
use mcp_agent_bridge::mcp::types::PROTOCOL_VERSION;
use mimalloc::MiMalloc;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const PIDFILE_VAR: &str = "MCP_ECHO_PIDFILE";

fn tools() -> Value {
    json!([
        {
            "name": "ping",
            "description": "Answer with pong",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "echo",
            "description": "Return the given text",
            "inputSchema": {
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }
        },
        {
            "name": "sleep",
            "description": "Wait for the given number of milliseconds",
            "inputSchema": {
                "type": "object",
                "properties": { "millis": { "type": "integer" } }
            }
        }
    ])
}

fn text_result(text: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": text.into() }] })
}

async fn call_tool(params: &Value) -> Result<Value, (i64, String)> {
    let name = params["name"].as_str().unwrap_or_default();
    let args = &params["arguments"];
    match name {
        "ping" => Ok(text_result("pong")),
        "echo" => match args["text"].as_str() {
            Some(text) => {
                let mut result = text_result(text);
                result["structuredContent"] = args.clone();
                Ok(result)
            }
            None => Ok(json!({
                "content": [{ "type": "text", "text": "missing 'text' argument" }],
                "isError": true
            })),
        },
        "sleep" => {
            let millis = args["millis"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(text_result(format!("slept {millis}ms")))
        }
        other => Err((-32602, format!("Unknown tool: {other}"))),
    }
}

async fn handle(method: &str, params: &Value) -> Result<Value, (i64, String)> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": params["protocolVersion"].as_str().unwrap_or(PROTOCOL_VERSION),
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "mcp-echo-server", "version": env!("CARGO_PKG_VERSION") }
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": tools() })),
        "tools/call" => call_tool(params).await,
        other => Err((-32601, format!("Method not found: {other}"))),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    if let Some(pidfile) = std::env::var_os(PIDFILE_VAR) {
        tokio::fs::write(&pidfile, std::process::id().to_string()).await?;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut sink = FramedWrite::new(tokio::io::stdout(), LinesCodec::new());
        while let Some(line) = rx.recv().await {
            if sink.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    while let Some(line) = lines.next().await {
        let line = line?;
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            tracing::warn!(line = %line, "ignoring malformed message");
            continue;
        };
        let Some(method) = message["method"].as_str().map(str::to_string) else {
            continue;
        };
        // Notifications carry no id and get no answer.
        let Some(id) = message.get("id").cloned() else {
            tracing::debug!(method = %method, "notification");
            continue;
        };

        let tx = tx.clone();
        tokio::spawn(async move {
            let reply = match handle(&method, &message["params"]).await {
                Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
                Err((code, msg)) => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": code, "message": msg }
                }),
            };
            let _ = tx.send(reply.to_string());
        });
    }

    tracing::debug!("stdin closed, exiting");
    drop(tx);
    let _ = writer.await;
    Ok(())
}
