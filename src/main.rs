//! `mcp-agent`: manage configured MCP servers and invoke their tools.

#![allow(clippy::map_err_ignore)]
#![allow(clippy::missing_fields_in_debug)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use mcp_agent_bridge::{
    agent::{Agent, ThinkTool, ToolId, ToolKind},
    config::{AppConfig, ConfigArgs, LoggingConfig},
    mcp::{ConnectStatus, McpClient, ServerConfig},
};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect every configured server and report its state
    Servers,
    /// Add or replace a server entry
    Add {
        name: String,
        /// Executable for a stdio server
        #[arg(long, required_unless_present = "address")]
        command: Option<String>,
        /// Argument passed to the executable (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment override as KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
        /// Working directory for the server process
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Socket address (tcp://host:port or unix:///path) of a running server
        #[arg(long, conflicts_with = "command")]
        address: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Keep the entry but do not connect it
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a server entry
    Remove { name: String },
    /// List tools of one server, or of every server
    Tools { server: Option<String> },
    /// Invoke a tool by id (`server:tool`, or a local tool such as `think`)
    Call {
        id: String,
        /// JSON object with the tool arguments
        #[arg(default_value = "{}")]
        args: String,
    },
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present) before clap reads its env fallbacks
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = AppConfig::from_args(&cli.config).context("failed to load configuration")?;
    init_tracing(&config.logging);

    info!(
        name: "mcp.config.loaded",
        path = %config.mcp.config_path,
        "MCP configuration loaded"
    );

    let client = Arc::new(
        McpClient::open_or_default(&config.mcp.config_path, config.client_options())
            .with_context(|| format!("failed to open {}", config.mcp.config_path))?,
    );

    let result = run(cli.command, &client).await;
    client.disconnect_all().await;
    result
}

async fn run(command: Command, client: &Arc<McpClient>) -> anyhow::Result<()> {
    match command {
        Command::Servers => {
            let registry = client.registry().await;
            for outcome in client.connect_all().await? {
                let transport = registry
                    .get(&outcome.server)
                    .map(|c| format!("{:?}", c.transport).to_lowercase())
                    .unwrap_or_default();
                let status = match outcome.status {
                    ConnectStatus::Connected { tool_count } => format!("connected ({tool_count} tools)"),
                    ConnectStatus::Failed { error } => format!("failed: {error}"),
                    ConnectStatus::Skipped => "disabled".to_string(),
                };
                println!("{}\t{transport}\t{status}", outcome.server);
            }
        }
        Command::Add {
            name,
            command,
            args,
            env,
            cwd,
            address,
            description,
            disabled,
        } => {
            let mut server = match (address, command) {
                (Some(address), _) => ServerConfig::socket(&name, address),
                (None, Some(command)) => ServerConfig::stdio(&name, command).with_args(args),
                (None, None) => bail!("either --command or --address is required"),
            };
            for (k, v) in env {
                server = server.with_env(k, v);
            }
            if let Some(cwd) = cwd {
                server = server.with_cwd(cwd);
            }
            if let Some(description) = description {
                server = server.with_description(description);
            }
            client
                .add_server(&name, server.with_enabled(!disabled))
                .await?;
            println!("added '{name}'");
        }
        Command::Remove { name } => {
            if client.remove_server(&name).await? {
                println!("removed '{name}'");
            } else {
                println!("no server named '{name}'");
            }
        }
        Command::Tools { server } => {
            match &server {
                Some(name) => {
                    if let ConnectStatus::Failed { error } = client.connect_to_server(name).await?.status {
                        return Err(error.into());
                    }
                    for tool in client.list_tools(Some(name)).await? {
                        println!("{}\t{}", tool.id(), tool.tool.description.unwrap_or_default());
                    }
                }
                None => {
                    let agent = Agent::new("mcp-agent", "", Arc::clone(client)).with_tool(Arc::new(ThinkTool));
                    agent.connect().await?;
                    for tool in agent.available_tools().await {
                        let origin = match tool.kind {
                            ToolKind::Local => "local".to_string(),
                            ToolKind::Remote { server } => server,
                        };
                        println!("{}\t{origin}\t{}", tool.id, tool.description);
                    }
                }
            }
        }
        Command::Call { id, args } => {
            let args: Value = serde_json::from_str(&args).context("tool arguments must be JSON")?;
            let agent = Agent::new("mcp-agent", "", Arc::clone(client)).with_tool(Arc::new(ThinkTool));
            if let ToolId::Remote { server, .. } = ToolId::parse(&id)? {
                let outcome = client.connect_to_server(&server).await?;
                if let ConnectStatus::Failed { error } = outcome.status {
                    return Err(error.into());
                }
            }
            let result = agent.execute_tool(&id, args).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}
