//! Error taxonomy for the MCP client and the agent facade.

use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced by the MCP client, server connections and the agent.
///
/// The `Display` form of every variant is meant to be shown to users as-is.
#[derive(Debug, Clone, thiserror::Error)]
pub enum McpError {
    /// The configuration file or one of its entries is missing or malformed.
    #[error("configuration error in {}: {message}", .path.display())]
    Config {
        /// File the error refers to.
        path: PathBuf,
        /// What is wrong with it.
        message: String,
    },

    /// Spawning or attaching to a server failed, or the handshake broke.
    #[error("failed to connect to server '{server}': {reason}")]
    Connection {
        /// Server name from the registry.
        server: String,
        /// Underlying OS or protocol error.
        reason: String,
    },

    /// The server is unknown or not in the connected state.
    #[error("server '{server}' is not connected")]
    NotConnected {
        /// Server name that was addressed.
        server: String,
    },

    /// The tool identifier does not resolve to any known tool.
    #[error("{}", tool_not_found_message(.server, .tool))]
    ToolNotFound {
        /// Owning server, `None` for local tools and malformed identifiers.
        server: Option<String>,
        /// Tool name or raw identifier.
        tool: String,
    },

    /// The remote server (or a local tool) reported a failure while running a tool.
    #[error("tool '{tool}' failed on server '{server}': {message}")]
    ToolExecution {
        /// Server that ran the tool (`local` for in-process tools).
        server: String,
        /// Tool name.
        tool: String,
        /// JSON-RPC error code, when the server supplied one.
        code: Option<i64>,
        /// Error message reported by the server.
        message: String,
    },

    /// No response arrived within the caller's deadline.
    #[error("server '{server}' did not answer {operation} within {}ms", .after.as_millis())]
    Timeout {
        /// Server that was waited on.
        server: String,
        /// Request method that timed out (`tools/list`, `tools/call`, ...).
        operation: String,
        /// The deadline that elapsed.
        after: Duration,
    },
}

impl McpError {
    pub(crate) fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn connection(server: &str, reason: impl std::fmt::Display) -> Self {
        Self::Connection {
            server: server.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn not_connected(server: &str) -> Self {
        Self::NotConnected {
            server: server.to_string(),
        }
    }

    /// Short machine-friendly name of the error kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Connection { .. } => "connection",
            Self::NotConnected { .. } => "not_connected",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::ToolExecution { .. } => "tool_execution",
            Self::Timeout { .. } => "timeout",
        }
    }
}

fn tool_not_found_message(server: &Option<String>, tool: &str) -> String {
    match server {
        Some(server) => format!("tool '{tool}' not found on server '{server}'"),
        None => format!("tool '{tool}' not found"),
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = McpError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        let err = McpError::not_connected("seq");
        assert_eq!(err.to_string(), "server 'seq' is not connected");

        let err = McpError::ToolNotFound {
            server: Some("seq".to_string()),
            tool: "think".to_string(),
        };
        assert_eq!(err.to_string(), "tool 'think' not found on server 'seq'");

        let err = McpError::ToolNotFound {
            server: None,
            tool: "a:b:c".to_string(),
        };
        assert_eq!(err.to_string(), "tool 'a:b:c' not found");
    }

    #[test]
    fn test_timeout_message() {
        let err = McpError::Timeout {
            server: "a".to_string(),
            operation: "tools/call".to_string(),
            after: Duration::from_millis(250),
        };
        assert_eq!(
            err.to_string(),
            "server 'a' did not answer tools/call within 250ms"
        );
        assert_eq!(err.kind(), "timeout");
    }
}
