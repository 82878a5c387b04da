//! Model Context Protocol (MCP) client implementation.
//!
//! Connects to any number of stdio or socket MCP servers, discovers their
//! tools, and dispatches `tools/call` requests to the owning server. The
//! protocol itself is spoken by `rmcp`; this module adds the registry,
//! per-server state and the multi-server catalog.
//!
//! # Configuration
//!
//! Servers are configured in `mcp_config.json`:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "time": {
//!       "command": "npx",
//!       "args": ["-y", "@mcpcentral/mcp-time"]
//!     },
//!     "search": {
//!       "command": "uvx",
//!       "args": ["search-server"],
//!       "env": { "SEARCH_API_KEY": "${SEARCH_API_KEY}" }
//!     },
//!     "notes": {
//!       "transport": "socket",
//!       "address": "tcp://127.0.0.1:7011"
//!     }
//!   }
//! }
//! ```
//!
//! # Tool Namespacing
//!
//! Remote tools are addressed as `server:tool` (e.g. `time:now`).

pub mod client;
pub mod config;
pub mod connection;
pub mod path;
pub mod transport;
pub mod types;

pub use client::{ConnectOutcome, ConnectStatus, McpClient};
pub use config::{DEFAULT_CONFIG_PATH, ServerConfig, ServerRegistry, SocketAddress, TransportKind};
pub use connection::{ClientOptions, ConnectionState, PreparedCall, ServerConnection};
pub use path::{HostPlatform, to_windows, to_wsl};
pub use types::{ServerTool, ToolDescriptor};
