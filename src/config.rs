use crate::mcp::{ClientOptions, DEFAULT_CONFIG_PATH};
use clap::{Args, Parser};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Settings shared by every binary. Flags win over `MCP_AGENT__*` variables,
/// which win over the config file, which wins over defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Config file path (YAML, TOML or JSON)
    #[arg(short, long, env = "CONFIG_FILE", global = true)]
    pub config: Option<String>,

    /// MCP server configuration file
    #[arg(long, env = "MCP_CONFIG_PATH", global = true)]
    pub mcp_config: Option<String>,

    /// Seconds to wait for each handshake step
    #[arg(long, global = true)]
    pub discovery_timeout: Option<u64>,

    /// Seconds to wait for a tool call
    #[arg(long, global = true)]
    pub call_timeout: Option<u64>,

    /// Log filter directive, e.g. `info` or `mcp_agent_bridge=debug`
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub mcp: McpSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct McpSettings {
    pub config_path: String,
    pub discovery_timeout_secs: u64,
    pub call_timeout_secs: u64,
    pub shutdown_grace_millis: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::from_args(&cli.config)
    }

    pub fn from_args(args: &ConfigArgs) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("mcp.config_path", DEFAULT_CONFIG_PATH)?
            .set_default("mcp.discovery_timeout_secs", 30)?
            .set_default("mcp.call_timeout_secs", 60)?
            .set_default("mcp.shutdown_grace_millis", 2000)?
            .set_default("logging.filter", "info")?
            .set_default("logging.json", false)?;

        // 2. Config file: explicit path must exist, ./mcp-agent.{yaml,toml,json} is optional
        builder = match &args.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("mcp-agent").required(false)),
        };

        // 3. Environment, e.g. MCP_AGENT__MCP__CALL_TIMEOUT_SECS=5
        builder = builder.add_source(
            Environment::with_prefix("MCP_AGENT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI overrides (clap also resolves their `env` fallbacks)
        if let Some(path) = &args.mcp_config {
            builder = builder.set_override("mcp.config_path", path.as_str())?;
        }
        if let Some(secs) = args.discovery_timeout {
            builder = builder.set_override("mcp.discovery_timeout_secs", secs)?;
        }
        if let Some(secs) = args.call_timeout {
            builder = builder.set_override("mcp.call_timeout_secs", secs)?;
        }
        if let Some(filter) = &args.log_filter {
            builder = builder.set_override("logging.filter", filter.as_str())?;
        }
        if args.log_json {
            builder = builder.set_override("logging.json", true)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    /// Timeouts for [`McpClient`](crate::mcp::McpClient) connections.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            discovery_timeout: Duration::from_secs(self.mcp.discovery_timeout_secs),
            call_timeout: Duration::from_secs(self.mcp.call_timeout_secs),
            shutdown_grace: Duration::from_millis(self.mcp.shutdown_grace_millis),
            ..ClientOptions::default()
        }
    }
}
