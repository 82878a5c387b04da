//! A single server connection: launch/attach, handshake, tool calls, teardown.

use crate::error::{McpError, Result};
use crate::mcp::config::{ServerConfig, SocketAddress, TransportKind};
use crate::mcp::path::HostPlatform;
use crate::mcp::transport;
use crate::mcp::types::ToolDescriptor;
use rmcp::model::{
    CallToolRequestParam, ClientCapabilities, ClientInfo, Implementation, PaginatedRequestParam,
    ProtocolVersion, ServerInfo,
};
use rmcp::service::RunningService;
use rmcp::{Peer, RoleClient, ServiceError, ServiceExt};
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};

/// Stop following `nextCursor` after this many pages.
const MAX_TOOL_PAGES: usize = 100;

/// A running client session; the handler answers server pings and carries
/// our `clientInfo`.
type Session = RunningService<RoleClient, ClientInfo>;

/// Timeouts and launch settings shared by every connection of a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Deadline for the `initialize` exchange, for each `tools/list` page and
    /// for socket connects.
    pub discovery_timeout: Duration,
    /// Default deadline for `tools/call`.
    pub call_timeout: Duration,
    /// How long `disconnect` waits for a server to stop. A stdio child that
    /// outlives it is killed in the background.
    pub shutdown_grace: Duration,
    /// Path syntax of the host, used to rewrite launch arguments.
    pub platform: HostPlatform,
    /// Sent as `clientInfo` during `initialize`.
    pub client_name: String,
    pub client_version: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(2),
            platform: HostPlatform::detect(),
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ClientOptions {
    fn client_info(&self) -> ClientInfo {
        ClientInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: self.client_name.clone(),
                version: self.client_version.clone(),
                ..Implementation::from_build_env()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        })
    }
}

/// Handle to one launched or attached server.
#[derive(Debug)]
pub struct ServerConnection {
    config: Arc<ServerConfig>,
    state: ConnectionState,
    tools: Vec<ToolDescriptor>,
    last_error: Option<McpError>,
    session: Option<Session>,
    shutdown_grace: Duration,
}

impl ServerConnection {
    /// A connection that has not been attempted yet.
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            tools: Vec::new(),
            last_error: None,
            session: None,
            shutdown_grace: ClientOptions::default().shutdown_grace,
        }
    }

    /// Launch or attach to the server and run the handshake.
    ///
    /// Always returns a connection; check [`ServerConnection::state`] or
    /// [`ServerConnection::last_error`] for the outcome. A failed connection
    /// holds no process or socket.
    pub async fn connect(config: Arc<ServerConfig>, options: &ClientOptions) -> Self {
        let mut conn = Self::new(config);
        conn.shutdown_grace = options.shutdown_grace;
        conn.establish(options).await;
        conn
    }

    async fn establish(&mut self, options: &ClientOptions) {
        self.state = ConnectionState::Connecting;
        tracing::info!(
            name: "mcp.server.connecting",
            server = %self.config.name,
            transport = ?self.config.transport,
            "Connecting to MCP server"
        );

        let session = match self.open(options).await {
            Ok(session) => session,
            Err(err) => {
                self.mark_failed(err);
                return;
            }
        };

        match list_all_tools(session.peer(), &self.config.name, options.discovery_timeout).await {
            Ok(tools) => {
                tracing::info!(
                    name: "mcp.server.connected",
                    server = %self.config.name,
                    tool_count = tools.len(),
                    "MCP server connected"
                );
                for tool in &tools {
                    tracing::debug!(
                        name: "mcp.tool.discovered",
                        server = %self.config.name,
                        tool = %tool.name,
                        "MCP tool discovered"
                    );
                }
                self.tools = tools;
                self.session = Some(session);
                self.state = ConnectionState::Connected;
            }
            Err(err) => {
                release(&self.config.name, session, self.shutdown_grace).await;
                self.mark_failed(err);
            }
        }
    }

    /// Start the transport and run `initialize` / `notifications/initialized`.
    async fn open(&self, options: &ClientOptions) -> Result<Session> {
        let config = &self.config;
        let handler = options.client_info();
        let timeout = options.discovery_timeout;

        let serving = match config.transport {
            TransportKind::Stdio => {
                let process = transport::spawn_stdio(config, options.platform).map_err(|e| {
                    McpError::connection(&config.name, format!("cannot spawn '{}': {e}", config.command))
                })?;
                tokio::time::timeout(timeout, handler.serve(process)).await
            }
            TransportKind::Socket => {
                let raw = config
                    .address
                    .as_deref()
                    .ok_or_else(|| McpError::connection(&config.name, "no socket address configured"))?;
                let address =
                    SocketAddress::parse(raw).map_err(|e| McpError::connection(&config.name, e))?;
                let (reader, writer) = tokio::time::timeout(timeout, transport::connect_socket(&address))
                    .await
                    .map_err(|_| timed_out(&config.name, "connect", timeout))?
                    .map_err(|e| McpError::connection(&config.name, format!("cannot connect to {raw}: {e}")))?;
                tokio::time::timeout(timeout, handler.serve((reader, writer))).await
            }
        };

        serving
            .map_err(|_| timed_out(&config.name, "initialize", timeout))?
            .map_err(|e| McpError::connection(&config.name, format!("initialize failed: {e}")))
    }

    fn mark_failed(&mut self, err: McpError) {
        tracing::warn!(
            name: "mcp.server.failed",
            server = %self.config.name,
            kind = err.kind(),
            error = %err,
            "MCP server connection failed"
        );
        self.tools.clear();
        self.state = ConnectionState::Failed;
        self.last_error = Some(err);
    }

    /// Record that the transport broke underneath a live connection: release
    /// what is left of it and move to [`ConnectionState::Failed`].
    pub async fn connection_lost(&mut self, err: McpError) {
        if self.state != ConnectionState::Connected {
            return;
        }
        if let Some(session) = self.session.take() {
            release(&self.config.name, session, self.shutdown_grace).await;
        }
        self.mark_failed(err);
    }

    /// Close the connection. Safe to call in any state and more than once;
    /// always ends in [`ConnectionState::Disconnected`].
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::info!(name: "mcp.server.disconnecting", server = %self.config.name, "Disconnecting MCP server");
            release(&self.config.name, session, self.shutdown_grace).await;
        }
        self.tools.clear();
        self.state = ConnectionState::Disconnected;
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Error recorded by the most recent failed attempt, if any.
    pub fn last_error(&self) -> Option<&McpError> {
        self.last_error.as_ref()
    }

    /// The `initialize` result the server sent.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.session.as_ref().and_then(|s| s.peer_info())
    }

    /// Catalog advertised during the handshake.
    pub fn tools(&self) -> Result<&[ToolDescriptor]> {
        self.session()?;
        Ok(&self.tools)
    }

    fn session(&self) -> Result<&Session> {
        match (&self.state, &self.session) {
            (ConnectionState::Connected, Some(session)) => Ok(session),
            _ => Err(McpError::not_connected(&self.config.name)),
        }
    }

    /// Ask the server for its catalog again and replace the cached one.
    pub async fn refresh_tools(&mut self, timeout: Duration) -> Result<&[ToolDescriptor]> {
        let peer = self.session()?.peer().clone();
        match list_all_tools(&peer, &self.config.name, timeout).await {
            Ok(tools) => {
                self.tools = tools;
                Ok(&self.tools)
            }
            Err(err) if peer.is_transport_closed() => {
                self.connection_lost(err.clone()).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Check `tool` against the catalog and capture what is needed to send
    /// the call without holding this connection.
    pub fn prepare_call(&self, tool: &str) -> Result<PreparedCall> {
        let session = self.session()?;
        if !self.tools.iter().any(|t| t.name == tool) {
            return Err(McpError::ToolNotFound {
                server: Some(self.config.name.clone()),
                tool: tool.to_string(),
            });
        }
        Ok(PreparedCall {
            server: self.config.name.clone(),
            tool: tool.to_string(),
            peer: session.peer().clone(),
        })
    }

    /// Forward a `tools/call` and return the raw `result` payload.
    ///
    /// A timeout is reported to the caller but leaves the connection up; a
    /// transport that closed underneath the call moves the connection to
    /// [`ConnectionState::Failed`].
    pub async fn call_tool(&mut self, tool: &str, arguments: Value, timeout: Duration) -> Result<Value> {
        let call = self.prepare_call(tool)?;
        let result = call.send(arguments, timeout).await;
        if let Err(err @ McpError::Connection { .. }) = &result {
            self.connection_lost(err.clone()).await;
        }
        result
    }
}

/// A `tools/call` bound to a live session.
///
/// Sending does not touch the [`ServerConnection`] it came from, so several
/// calls to one server can be in flight while its state stays readable. A
/// [`McpError::Connection`] from [`PreparedCall::send`] means the transport is
/// gone; pass it to [`ServerConnection::connection_lost`].
#[derive(Debug, Clone)]
pub struct PreparedCall {
    server: String,
    tool: String,
    peer: Peer<RoleClient>,
}

impl PreparedCall {
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Send the call. `null` arguments are sent as `{}`.
    pub async fn send(self, arguments: Value, timeout: Duration) -> Result<Value> {
        let arguments = match arguments {
            Value::Null => serde_json::Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(self.execution_error(None, format!("arguments must be a JSON object, got {other}")));
            }
        };

        tracing::debug!(
            name: "mcp.tool.call",
            server = %self.server,
            tool = %self.tool,
            arguments = %serde_json::Value::Object(arguments.clone()),
            "Calling MCP tool"
        );
        let request = CallToolRequestParam {
            name: self.tool.clone().into(),
            arguments: Some(arguments),
        };
        let outcome = tokio::time::timeout(timeout, self.peer.call_tool(request))
            .await
            .map_err(|_| timed_out(&self.server, "tools/call", timeout))?;

        match outcome {
            Ok(result) => serde_json::to_value(&result)
                .map_err(|e| self.execution_error(None, format!("cannot encode tools/call result: {e}"))),
            Err(ServiceError::McpError(e)) => Err(self.execution_error(Some(i64::from(e.code.0)), e.message.into_owned())),
            Err(ServiceError::TransportClosed | ServiceError::TransportSend(_) | ServiceError::Cancelled { .. }) => {
                Err(McpError::connection(&self.server, "connection lost during tools/call"))
            }
            Err(ServiceError::UnexpectedResponse) => {
                Err(self.execution_error(None, "malformed tools/call response".to_string()))
            }
            Err(other) => Err(self.execution_error(None, other.to_string())),
        }
    }

    fn execution_error(&self, code: Option<i64>, message: String) -> McpError {
        McpError::ToolExecution {
            server: self.server.clone(),
            tool: self.tool.clone(),
            code,
            message,
        }
    }
}

async fn list_all_tools(peer: &Peer<RoleClient>, server: &str, timeout: Duration) -> Result<Vec<ToolDescriptor>> {
    let mut out = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_TOOL_PAGES {
        let request = PaginatedRequestParam { cursor: cursor.clone() };
        let page = tokio::time::timeout(timeout, peer.list_tools(Some(request)))
            .await
            .map_err(|_| timed_out(server, "tools/list", timeout))?
            .map_err(|e| discovery_error(server, "tools/list", e))?;
        out.extend(page.tools.into_iter().map(ToolDescriptor::from));

        match page.next_cursor {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => return Ok(out),
        }
    }

    tracing::warn!(server = %server, pages = MAX_TOOL_PAGES, "tools/list pagination truncated");
    Ok(out)
}

fn discovery_error(server: &str, method: &str, err: ServiceError) -> McpError {
    match err {
        ServiceError::McpError(e) => {
            McpError::connection(server, format!("{method} failed: {} (code {})", e.message, e.code.0))
        }
        ServiceError::UnexpectedResponse => McpError::connection(server, format!("malformed {method} response")),
        ServiceError::TransportClosed | ServiceError::TransportSend(_) => {
            McpError::connection(server, format!("server closed the connection during {method}"))
        }
        other => McpError::connection(server, format!("{method} failed: {other}")),
    }
}

fn timed_out(server: &str, operation: &str, after: Duration) -> McpError {
    McpError::Timeout {
        server: server.to_string(),
        operation: operation.to_string(),
        after,
    }
}

/// Cancel the session. That closes the transport and gives a stdio child a
/// chance to exit before it is killed.
async fn release(server: &str, session: Session, grace: Duration) {
    match tokio::time::timeout(grace, session.cancel()).await {
        Ok(Ok(reason)) => tracing::debug!(server = %server, reason = ?reason, "MCP session closed"),
        Ok(Err(e)) => tracing::warn!(server = %server, error = %e, "MCP session task failed"),
        Err(_) => tracing::warn!(server = %server, after = ?grace, "MCP server did not stop in time"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ClientOptions {
        ClientOptions {
            discovery_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_millis(200),
            platform: HostPlatform::Other,
            ..ClientOptions::default()
        }
    }

    #[test]
    fn test_new_connection_is_disconnected() {
        let conn = ServerConnection::new(Arc::new(ServerConfig::stdio("idle", "true")));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.state().to_string(), "disconnected");
        assert!(conn.last_error().is_none());
        assert!(matches!(conn.prepare_call("ping"), Err(McpError::NotConnected { .. })));
    }

    #[test]
    fn test_client_info_carries_name() {
        let info = ClientOptions {
            client_name: "scribe".to_string(),
            client_version: "9.9.9".to_string(),
            ..options()
        }
        .client_info();
        assert_eq!(info.client_info.name, "scribe");
        assert_eq!(info.client_info.version, "9.9.9");
    }

    #[tokio::test]
    async fn test_failed_connection_rejects_use() {
        let config = Arc::new(ServerConfig::stdio("ghost", "/definitely/not/a/real/binary"));
        let mut conn = ServerConnection::connect(config, &options()).await;
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(matches!(conn.last_error(), Some(McpError::Connection { .. })));
        assert!(conn.server_info().is_none());

        assert!(matches!(conn.tools(), Err(McpError::NotConnected { ref server }) if server == "ghost"));
        let err = conn
            .call_tool("ping", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected { ref server } if server == "ghost"));
        assert!(matches!(
            conn.refresh_tools(Duration::from_secs(1)).await,
            Err(McpError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_failed_connection_twice() {
        let config = Arc::new(ServerConfig::stdio("ghost", "/definitely/not/a/real/binary"));
        let mut conn = ServerConnection::connect(config, &options()).await;
        assert_eq!(conn.state(), ConnectionState::Failed);

        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(conn.tools(), Err(McpError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_socket_without_address_fails() {
        let mut config = ServerConfig::socket("notes", "tcp://127.0.0.1:1");
        config.address = None;
        let conn = ServerConnection::connect(Arc::new(config), &options()).await;
        match conn.last_error() {
            Some(McpError::Connection { reason, .. }) => assert!(reason.contains("no socket address"), "{reason}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_lost_ignored_unless_connected() {
        let mut conn = ServerConnection::new(Arc::new(ServerConfig::stdio("idle", "true")));
        conn.connection_lost(McpError::connection("idle", "gone")).await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.last_error().is_none());
    }
}
