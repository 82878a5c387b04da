//! Multi-server orchestration over [`ServerConnection`]s.

use crate::error::{McpError, Result};
use crate::mcp::config::{ServerConfig, ServerRegistry};
use crate::mcp::connection::{ClientOptions, ConnectionState, ServerConnection};
use crate::mcp::types::ServerTool;
use futures::future::join_all;
use serde_json::Value;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{Mutex, RwLock};

/// Result of one connection attempt made by [`McpClient::connect_all`].
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    pub server: String,
    pub status: ConnectStatus,
}

#[derive(Debug, Clone)]
pub enum ConnectStatus {
    Connected { tool_count: usize },
    Failed { error: McpError },
    /// The entry is disabled in the configuration.
    Skipped,
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self.status, ConnectStatus::Connected { .. })
    }
}

#[derive(Debug)]
struct RegistryState {
    path: Option<PathBuf>,
    registry: ServerRegistry,
    /// A missing file is an error on reload rather than an empty registry.
    strict: bool,
}

type SharedConnection = Arc<Mutex<ServerConnection>>;

/// MCP client managing any number of configured servers.
///
/// Each connection's state sits behind its own lock, held only for
/// bookkeeping. Tool calls run outside it, so calls to one server can overlap
/// and state queries never wait for a call.
pub struct McpClient {
    state: RwLock<RegistryState>,
    connections: RwLock<HashMap<String, SharedConnection>>,
    options: ClientOptions,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// A client over an in-memory registry. Nothing is persisted.
    pub fn new(registry: ServerRegistry, options: ClientOptions) -> Self {
        Self::with_state(None, registry, false, options)
    }

    /// Load the registry from `path`; later additions and removals are saved there.
    ///
    /// The file must keep existing: if it disappears, the next
    /// [`McpClient::connect_all`] fails instead of starting empty.
    pub fn from_config_path(path: impl AsRef<Path>, options: ClientOptions) -> Result<Self> {
        let path = path.as_ref();
        let registry = ServerRegistry::load(path)?;
        Ok(Self::with_state(Some(path.to_path_buf()), registry, true, options))
    }

    /// Like [`McpClient::from_config_path`], but a missing file starts empty.
    pub fn open_or_default(path: impl AsRef<Path>, options: ClientOptions) -> Result<Self> {
        let path = path.as_ref();
        let registry = ServerRegistry::load_or_default(path)?;
        Ok(Self::with_state(Some(path.to_path_buf()), registry, false, options))
    }

    fn with_state(path: Option<PathBuf>, registry: ServerRegistry, strict: bool, options: ClientOptions) -> Self {
        Self {
            state: RwLock::new(RegistryState { path, registry, strict }),
            connections: RwLock::new(HashMap::new()),
            options,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub async fn config_path(&self) -> Option<PathBuf> {
        self.state.read().await.path.clone()
    }

    /// Snapshot of the current registry.
    pub async fn registry(&self) -> ServerRegistry {
        self.state.read().await.registry.clone()
    }

    /// Tear down every connection and switch to the configuration at `path`.
    ///
    /// The current registry is kept if the new one cannot be loaded.
    pub async fn reinitialize(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let registry = ServerRegistry::load(path)?;
        self.disconnect_all().await;

        let mut state = self.state.write().await;
        state.path = Some(path.to_path_buf());
        state.registry = registry;
        state.strict = true;
        tracing::info!(
            name: "mcp.client.reinitialized",
            path = %path.display(),
            servers = state.registry.len(),
            "MCP client reinitialized"
        );
        Ok(())
    }

    /// Connect every enabled server concurrently.
    ///
    /// When the client is backed by a file, the file is read again first and
    /// connections whose entries are gone from it are closed. A server that
    /// fails to connect is reported in its outcome and does not affect the
    /// others.
    pub async fn connect_all(&self) -> Result<Vec<ConnectOutcome>> {
        let registry = self.reload().await?;
        self.prune(&registry).await;
        let configs: Vec<ServerConfig> = registry.iter().cloned().collect();

        let outcomes = join_all(configs.into_iter().map(|config| self.connect_config(config))).await;

        let connected = outcomes.iter().filter(|o| o.is_connected()).count();
        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o.status, ConnectStatus::Skipped))
            .count();
        tracing::info!(
            name: "mcp.client.connect_all",
            connected,
            failed = outcomes.len() - connected - skipped,
            skipped,
            "MCP servers initialized"
        );
        Ok(outcomes)
    }

    async fn reload(&self) -> Result<ServerRegistry> {
        let mut state = self.state.write().await;
        if let Some(path) = state.path.clone() {
            state.registry = if state.strict {
                ServerRegistry::load(&path)?
            } else {
                ServerRegistry::load_or_default(&path)?
            };
        }
        Ok(state.registry.clone())
    }

    /// Disconnect tracked servers that `registry` no longer lists.
    async fn prune(&self, registry: &ServerRegistry) {
        let stale: Vec<String> = self
            .connections
            .read()
            .await
            .keys()
            .filter(|name| !registry.contains(name))
            .cloned()
            .collect();
        for name in stale {
            if self.disconnect_server(&name).await {
                tracing::info!(name: "mcp.server.pruned", server = %name, "MCP server no longer configured");
            }
        }
    }

    /// (Re)connect one registry entry.
    pub async fn connect_to_server(&self, name: &str) -> Result<ConnectOutcome> {
        let config = {
            let state = self.state.read().await;
            let path = origin(state.path.as_ref());
            state
                .registry
                .get(name)
                .cloned()
                .ok_or_else(|| McpError::config(path, format!("no server named '{name}' is configured")))?
        };
        Ok(self.connect_config(config).await)
    }

    async fn connect_config(&self, config: ServerConfig) -> ConnectOutcome {
        let server = config.name.clone();
        self.disconnect_server(&server).await;

        if !config.enabled {
            tracing::info!(name: "mcp.server.skipped", server = %server, "MCP server disabled");
            return ConnectOutcome {
                server,
                status: ConnectStatus::Skipped,
            };
        }

        let conn = ServerConnection::connect(Arc::new(config), &self.options).await;
        let status = match conn.tools() {
            Ok(tools) => ConnectStatus::Connected {
                tool_count: tools.len(),
            },
            Err(_) => ConnectStatus::Failed {
                error: conn
                    .last_error()
                    .cloned()
                    .unwrap_or_else(|| McpError::connection(&server, "connection did not complete")),
            },
        };

        let previous = self
            .connections
            .write()
            .await
            .insert(server.clone(), Arc::new(Mutex::new(conn)));
        if let Some(previous) = previous {
            previous.lock().await.disconnect().await;
        }

        ConnectOutcome { server, status }
    }

    /// Disconnect one server. Returns whether a connection was tracked.
    pub async fn disconnect_server(&self, name: &str) -> bool {
        let removed = self.connections.write().await.remove(name);
        match removed {
            Some(conn) => {
                conn.lock().await.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Disconnect every server. Never fails; problems are logged.
    pub async fn disconnect_all(&self) {
        let drained: Vec<SharedConnection> = self.connections.write().await.drain().map(|(_, c)| c).collect();
        let count = drained.len();
        join_all(drained.into_iter().map(|conn| async move {
            conn.lock().await.disconnect().await;
        }))
        .await;
        if count > 0 {
            tracing::info!(name: "mcp.client.disconnect_all", servers = count, "MCP servers disconnected");
        }
    }

    async fn connection(&self, name: &str) -> Result<SharedConnection> {
        self.connections
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::not_connected(name))
    }

    async fn snapshot(&self) -> Vec<(String, SharedConnection)> {
        let mut entries: Vec<_> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(name, conn)| (name.clone(), Arc::clone(conn)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Names of connected servers, sorted.
    pub async fn list_servers(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (name, conn) in self.snapshot().await {
            if conn.lock().await.is_connected() {
                names.push(name);
            }
        }
        names
    }

    /// Every tracked server with its state and last error, sorted by name.
    pub async fn server_states(&self) -> Vec<(String, ConnectionState, Option<McpError>)> {
        let mut states = Vec::new();
        for (name, conn) in self.snapshot().await {
            let conn = conn.lock().await;
            states.push((name, conn.state(), conn.last_error().cloned()));
        }
        states
    }

    /// One server's catalog, or the union across connected servers.
    pub async fn list_tools(&self, server: Option<&str>) -> Result<Vec<ServerTool>> {
        if let Some(name) = server {
            let conn = self.connection(name).await?;
            let conn = conn.lock().await;
            return Ok(tag(name, conn.tools()?));
        }

        let mut out = Vec::new();
        for (name, conn) in self.snapshot().await {
            let conn = conn.lock().await;
            if let Ok(tools) = conn.tools() {
                out.extend(tag(&name, tools));
            }
        }
        Ok(out)
    }

    /// Re-query one server's catalog.
    pub async fn refresh_tools(&self, server: &str) -> Result<Vec<ServerTool>> {
        let conn = self.connection(server).await?;
        let mut conn = conn.lock().await;
        let tools = conn.refresh_tools(self.options.discovery_timeout).await?;
        Ok(tag(server, tools))
    }

    /// Invoke `tool` on `server` with the default call timeout.
    pub async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> Result<Value> {
        self.call_tool_with_timeout(server, tool, arguments, self.options.call_timeout)
            .await
    }

    pub async fn call_tool_with_timeout(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let conn = self.connection(server).await?;
        let call = conn.lock().await.prepare_call(tool)?;
        let result = call.send(arguments, timeout).await;
        if let Err(err @ McpError::Connection { .. }) = &result {
            conn.lock().await.connection_lost(err.clone()).await;
        }
        result
    }

    /// Add or replace a server entry and persist the registry.
    pub async fn add_server(&self, name: &str, config: ServerConfig) -> Result<()> {
        let mut state = self.state.write().await;
        let path = state.path.clone();
        let previous = state
            .registry
            .add(name, config)
            .map_err(|e| McpError::config(origin(path.as_ref()), e))?;
        if let Some(path) = &path {
            if let Err(err) = state.registry.save(path) {
                // Keep memory and disk in agreement.
                match previous {
                    Some(previous) => {
                        let _ = state.registry.add(name, previous);
                    }
                    None => {
                        state.registry.remove(name);
                    }
                }
                return Err(err);
            }
        }
        tracing::info!(name: "mcp.server.added", server = %name, replaced = previous.is_some(), "MCP server configured");
        Ok(())
    }

    /// Remove a server entry, persist the registry, and drop any live
    /// connection of that name. Returns whether the entry existed.
    pub async fn remove_server(&self, name: &str) -> Result<bool> {
        let removed = {
            let mut state = self.state.write().await;
            let Some(removed) = state.registry.remove(name) else {
                return Ok(false);
            };
            if let Some(path) = state.path.clone() {
                if let Err(err) = state.registry.save(&path) {
                    let _ = state.registry.add(name, removed);
                    return Err(err);
                }
            }
            removed
        };
        self.disconnect_server(name).await;
        tracing::info!(name: "mcp.server.removed", server = %removed.name, "MCP server removed");
        Ok(true)
    }
}

/// Path reported in configuration errors.
fn origin(path: Option<&PathBuf>) -> PathBuf {
    path.cloned()
        .unwrap_or_else(|| PathBuf::from("<in-memory registry>"))
}

fn tag(server: &str, tools: &[crate::mcp::types::ToolDescriptor]) -> Vec<ServerTool> {
    tools
        .iter()
        .map(|tool| ServerTool {
            server: server.to_string(),
            tool: tool.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::path::HostPlatform;

    fn options() -> ClientOptions {
        ClientOptions {
            discovery_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(200),
            platform: HostPlatform::Other,
            ..ClientOptions::default()
        }
    }

    #[tokio::test]
    async fn test_empty_client() {
        let client = McpClient::new(ServerRegistry::new(), options());
        assert!(client.connect_all().await.unwrap().is_empty());
        assert!(client.list_servers().await.is_empty());
        assert!(client.list_tools(None).await.unwrap().is_empty());
        client.disconnect_all().await;
    }

    #[tokio::test]
    async fn test_unknown_server_is_not_connected() {
        let client = McpClient::new(ServerRegistry::new(), options());
        let err = client
            .call_tool("nope", "ping", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected { ref server } if server == "nope"));
        assert!(matches!(
            client.list_tools(Some("nope")).await,
            Err(McpError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_disabled_server_is_skipped() {
        let client = McpClient::new(ServerRegistry::new(), options());
        client
            .add_server("off", ServerConfig::stdio("off", "does-not-matter").with_enabled(false))
            .await
            .unwrap();

        let outcomes = client.connect_all().await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].status, ConnectStatus::Skipped));
        assert!(client.server_states().await.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let client = McpClient::new(ServerRegistry::new(), options());
        client
            .add_server("ghost", ServerConfig::stdio("ghost", "/definitely/not/a/real/binary"))
            .await
            .unwrap();

        let outcome = client.connect_to_server("ghost").await.unwrap();
        match outcome.status {
            ConnectStatus::Failed {
                error: McpError::Connection { server, reason },
            } => {
                assert_eq!(server, "ghost");
                assert!(reason.contains("cannot spawn"), "{reason}");
            }
            other => panic!("unexpected status {other:?}"),
        }

        let states = client.server_states().await;
        assert_eq!(states[0].1, ConnectionState::Failed);
        assert!(client.list_servers().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_unknown_entry() {
        let client = McpClient::new(ServerRegistry::new(), options());
        let err = client.connect_to_server("missing").await.unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[tokio::test]
    async fn test_add_remove_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_config.json");
        let client = McpClient::open_or_default(&path, options()).unwrap();

        client
            .add_server("time", ServerConfig::stdio("time", "npx").with_arg("-y"))
            .await
            .unwrap();
        let saved = ServerRegistry::load(&path).unwrap();
        assert_eq!(saved.names(), vec!["time".to_string()]);

        assert!(client.remove_server("time").await.unwrap());
        assert!(!client.remove_server("time").await.unwrap());
        assert!(ServerRegistry::load(&path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_file_fails_strict_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_config.json");
        let mut registry = ServerRegistry::new();
        registry
            .add("off", ServerConfig::stdio("off", "npx").with_enabled(false))
            .unwrap();
        registry.save(&path).unwrap();

        let client = McpClient::from_config_path(&path, options()).unwrap();
        assert_eq!(client.connect_all().await.unwrap().len(), 1);

        std::fs::remove_file(&path).unwrap();
        let err = client.connect_all().await.unwrap_err();
        assert!(matches!(err, McpError::Config { ref path, .. } if path.ends_with("mcp_config.json")));
        // The last good registry is kept.
        assert!(client.registry().await.contains("off"));
    }

    #[tokio::test]
    async fn test_deleted_file_is_empty_for_lenient_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_config.json");
        let client = McpClient::open_or_default(&path, options()).unwrap();
        client
            .add_server("off", ServerConfig::stdio("off", "npx").with_enabled(false))
            .await
            .unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(client.connect_all().await.unwrap().is_empty());
        assert!(client.registry().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_config() {
        let client = McpClient::new(ServerRegistry::new(), options());
        let err = client
            .add_server("bad", ServerConfig::stdio("bad", ""))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(client.registry().await.is_empty());
    }
}
