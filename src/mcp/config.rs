//! Server registry: the `mcpServers` JSON document and its validated entries.

use crate::error::{McpError, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use url::Url;

/// Default configuration file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "mcp_config.json";

/// How the client reaches a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawn `command` and talk over its stdin/stdout.
    #[default]
    Stdio,
    /// Connect to an already running endpoint at `address`.
    Socket,
}

/// Parsed socket endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    /// `tcp://host:port` (or a bare `host:port`).
    Tcp {
        /// Host name or IP literal.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// `unix:///path/to/socket`.
    Unix(PathBuf),
}

impl SocketAddress {
    pub fn parse(address: &str) -> std::result::Result<Self, String> {
        let address = address.trim();
        let with_scheme = if address.contains("://") {
            address.to_string()
        } else {
            format!("tcp://{address}")
        };
        let url = Url::parse(&with_scheme).map_err(|e| format!("invalid address '{address}': {e}"))?;

        match url.scheme() {
            "tcp" => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| format!("address '{address}' has no host"))?;
                let port = url
                    .port()
                    .ok_or_else(|| format!("address '{address}' has no port"))?;
                // Url keeps the brackets around IPv6 literals.
                let host = host.trim_start_matches('[').trim_end_matches(']');
                Ok(Self::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            "unix" => {
                if url.path().is_empty() || url.path() == "/" {
                    return Err(format!("address '{address}' has no socket path"));
                }
                Ok(Self::Unix(PathBuf::from(url.path())))
            }
            other => Err(format!("unsupported address scheme '{other}'")),
        }
    }
}

/// Validated description of one external tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Unique registry key.
    pub name: String,
    pub transport: TransportKind,
    /// Executable to spawn (stdio only).
    pub command: String,
    pub args: Vec<String>,
    /// Merged over the ambient environment of the client process.
    pub env: HashMap<String, String>,
    /// Working directory for the child process.
    pub cwd: Option<PathBuf>,
    /// Endpoint for socket servers.
    pub address: Option<String>,
    pub description: Option<String>,
    /// Disabled servers stay in the file but are never connected.
    pub enabled: bool,
}

impl ServerConfig {
    /// A stdio server launched with `command`.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            command: command.into(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            address: None,
            description: None,
            enabled: true,
        }
    }

    /// A socket server reachable at `address`.
    pub fn socket(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::Socket,
            command: String::new(),
            address: Some(address.into()),
            ..Self::stdio(name, "")
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check the per-entry invariants. Returns a message describing the first
    /// violation.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("server name must not be empty".to_string());
        }
        match self.transport {
            TransportKind::Stdio if self.command.trim().is_empty() => Err(format!(
                "server '{}': missing required field 'command'",
                self.name
            )),
            TransportKind::Stdio => Ok(()),
            TransportKind::Socket => {
                let address = self.address.as_deref().ok_or_else(|| {
                    format!("server '{}': missing required field 'address'", self.name)
                })?;
                SocketAddress::parse(address)
                    .map(|_| ())
                    .map_err(|e| format!("server '{}': {e}", self.name))
            }
        }
    }

    /// Environment overrides with `${VAR}` placeholders expanded.
    pub fn expanded_env(&self) -> HashMap<String, String> {
        expand_env_map(&self.env)
    }

    fn from_entry(name: &str, entry: McpServerEntry) -> Self {
        let transport = entry.transport.unwrap_or(if entry.address.is_some() {
            TransportKind::Socket
        } else {
            TransportKind::Stdio
        });
        Self {
            name: name.to_string(),
            transport,
            command: entry.command.unwrap_or_default(),
            args: entry.args,
            env: entry.env.into_iter().collect(),
            cwd: entry.cwd,
            address: entry.address,
            description: entry.description,
            enabled: entry.enabled.unwrap_or(true),
        }
    }

    fn to_entry(&self) -> McpServerEntry {
        McpServerEntry {
            transport: (self.transport != TransportKind::Stdio).then_some(self.transport),
            command: (!self.command.is_empty()).then(|| self.command.clone()),
            args: self.args.clone(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            cwd: self.cwd.clone(),
            address: self.address.clone(),
            description: self.description.clone(),
            enabled: (!self.enabled).then_some(false),
        }
    }
}

/// On-disk shape of the configuration file.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
struct McpConfig {
    #[serde(rename = "mcpServers")]
    mcp_servers: BTreeMap<String, McpServerEntry>,
}

/// On-disk shape of a single server. Unknown fields are ignored.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
struct McpServerEntry {
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    transport: Option<TransportKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cwd: Option<PathBuf>,
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
}

/// Mapping from server name to [`ServerConfig`], backed by a JSON document of
/// the form `{"mcpServers": {name: {command, args, env}}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerRegistry {
    servers: BTreeMap<String, ServerConfig>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and validate the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let txt = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => McpError::config(path, "file not found"),
            _ => McpError::config(path, e.to_string()),
        })?;
        Self::from_json(path, &txt)
    }

    /// Like [`ServerRegistry::load`], but a missing file yields an empty registry.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Parse a configuration document. `path` is only used in error messages.
    pub fn from_json(path: impl AsRef<Path>, txt: &str) -> Result<Self> {
        let path = path.as_ref();
        let cfg: McpConfig = serde_json::from_str(txt)
            .map_err(|e| McpError::config(path, format!("invalid JSON: {e}")))?;

        let mut servers = BTreeMap::new();
        for (name, entry) in cfg.mcp_servers {
            let config = ServerConfig::from_entry(&name, entry);
            config
                .validate()
                .map_err(|message| McpError::config(path, message))?;
            servers.insert(name, config);
        }
        Ok(Self { servers })
    }

    /// Render the registry as a pretty-printed configuration document.
    pub fn to_json(&self) -> String {
        let cfg = McpConfig {
            mcp_servers: self
                .servers
                .iter()
                .map(|(name, config)| (name.clone(), config.to_entry()))
                .collect(),
        };
        // A map of plain strings, vectors and options always serializes.
        serde_json::to_string_pretty(&cfg).unwrap_or_else(|_| "{\"mcpServers\":{}}".to_string())
    }

    /// Write the registry to `path`, replacing the file in one rename so
    /// readers never observe a partial document.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| McpError::config(path, format!("cannot create temp file: {e}")))?;
        tmp.write_all(self.to_json().as_bytes())
            .and_then(|()| tmp.write_all(b"\n"))
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| McpError::config(path, format!("cannot write: {e}")))?;
        tmp.persist(path)
            .map_err(|e| McpError::config(path, format!("cannot replace file: {}", e.error)))?;
        Ok(())
    }

    /// Insert or replace the server called `name`. The stored entry always
    /// carries `name` as its key.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        mut config: ServerConfig,
    ) -> std::result::Result<Option<ServerConfig>, String> {
        config.name = name.into();
        config.validate()?;
        Ok(self.servers.insert(config.name.clone(), config))
    }

    /// Remove `name`; absent names are not an error.
    pub fn remove(&mut self, name: &str) -> Option<ServerConfig> {
        self.servers.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    /// Server names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.values()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Expand `${VAR}` placeholders from the process environment.
///
/// Placeholders naming unset variables are left unchanged.
pub fn expand_env_placeholders(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) if !name.is_empty() => out.push_str(&value),
                    _ => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn expand_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document() {
        let txt = r#"{
            "mcpServers": {
                "test-server": {
                    "command": "python",
                    "args": ["-m", "test_server"],
                    "env": {"TEST_KEY": "test-value"},
                    "futureField": 42
                },
                "remote": {"address": "tcp://127.0.0.1:7000"}
            }
        }"#;
        let registry = ServerRegistry::from_json("mcp_config.json", txt).unwrap();
        assert_eq!(registry.names(), vec!["remote", "test-server"]);

        let server = registry.get("test-server").unwrap();
        assert_eq!(server.transport, TransportKind::Stdio);
        assert_eq!(server.command, "python");
        assert_eq!(server.args, vec!["-m", "test_server"]);
        assert_eq!(server.env["TEST_KEY"], "test-value");
        assert!(server.enabled);

        let remote = registry.get("remote").unwrap();
        assert_eq!(remote.transport, TransportKind::Socket);
    }

    #[test]
    fn test_missing_command_is_rejected() {
        let txt = r#"{"mcpServers": {"a": {"args": ["x"]}}}"#;
        let err = ServerRegistry::from_json("cfg.json", txt).unwrap_err();
        assert!(matches!(err, McpError::Config { .. }));
        assert!(err.to_string().contains("'command'"));
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let err = ServerRegistry::from_json("cfg.json", "{not json").unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));

        let err = ServerRegistry::from_json("cfg.json", r#"{"servers": {}}"#).unwrap_err();
        assert!(matches!(err, McpError::Config { .. }));
    }

    #[test]
    fn test_add_and_remove() {
        let mut registry = ServerRegistry::new();
        let previous = registry
            .add("seq", ServerConfig::stdio("ignored", "npx").with_arg("-y"))
            .unwrap();
        assert!(previous.is_none());
        assert_eq!(registry.get("seq").unwrap().name, "seq");

        let previous = registry.add("seq", ServerConfig::stdio("", "uvx")).unwrap();
        assert_eq!(previous.unwrap().command, "npx");
        assert_eq!(registry.len(), 1);

        assert!(registry.add("bad", ServerConfig::stdio("", "")).is_err());
        assert!(registry.remove("missing").is_none());
        assert!(registry.remove("seq").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_socket_address_parsing() {
        assert_eq!(
            SocketAddress::parse("tcp://localhost:9000").unwrap(),
            SocketAddress::Tcp {
                host: "localhost".to_string(),
                port: 9000
            }
        );
        assert_eq!(
            SocketAddress::parse("127.0.0.1:80").unwrap(),
            SocketAddress::Tcp {
                host: "127.0.0.1".to_string(),
                port: 80
            }
        );
        assert_eq!(
            SocketAddress::parse("unix:///tmp/mcp.sock").unwrap(),
            SocketAddress::Unix(PathBuf::from("/tmp/mcp.sock"))
        );
        assert!(SocketAddress::parse("tcp://localhost").is_err());
        assert!(SocketAddress::parse("http://localhost:80").is_err());
    }

    #[test]
    fn test_expand_env_placeholders() {
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand_env_placeholders("${PATH}"), path);
        assert_eq!(
            expand_env_placeholders("key=${SURELY_NOT_SET_MCP_AGENT_VAR}"),
            "key=${SURELY_NOT_SET_MCP_AGENT_VAR}"
        );
        assert_eq!(expand_env_placeholders("a ${unterminated"), "a ${unterminated");
        assert_eq!(expand_env_placeholders("plain"), "plain");
    }

    #[test]
    fn test_serialized_shape() {
        let mut registry = ServerRegistry::new();
        registry
            .add(
                "a",
                ServerConfig::stdio("a", "echo_server").with_env("TOKEN", "${TOKEN}"),
            )
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&registry.to_json()).unwrap();
        assert_eq!(value["mcpServers"]["a"]["command"], "echo_server");
        assert_eq!(value["mcpServers"]["a"]["args"], serde_json::json!([]));
        assert_eq!(value["mcpServers"]["a"]["env"]["TOKEN"], "${TOKEN}");
        assert!(value["mcpServers"]["a"].get("transport").is_none());
    }
}
