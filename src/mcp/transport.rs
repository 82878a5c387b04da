//! Opening the byte streams an MCP session runs over.

use crate::mcp::config::{ServerConfig, SocketAddress};
use crate::mcp::path::HostPlatform;
use rmcp::transport::TokioChildProcess;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Build the launch command for a stdio server.
///
/// Arguments and environment values are translated for `platform`, and the
/// environment overrides are applied on top of the inherited environment.
pub fn build_command(config: &ServerConfig, platform: HostPlatform) -> Command {
    let mut cmd = Command::new(&config.command);
    cmd.args(platform.translate_args(&config.args))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    for (k, v) in platform.translate_env(&config.expanded_env()) {
        cmd.env(k, v);
    }
    if let Some(cwd) = &config.cwd {
        cmd.current_dir(platform.translate(&cwd.to_string_lossy()));
    }
    cmd
}

/// Spawn a stdio server. The child is killed if the transport is dropped
/// without a shutdown.
pub fn spawn_stdio(config: &ServerConfig, platform: HostPlatform) -> io::Result<TokioChildProcess> {
    TokioChildProcess::new(build_command(config, platform))
}

/// Connect to a running socket server.
pub async fn connect_socket(address: &SocketAddress) -> io::Result<(BoxedReader, BoxedWriter)> {
    match address {
        SocketAddress::Tcp { host, port } => {
            let stream = tokio::net::TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            let (read, write) = stream.into_split();
            Ok((Box::new(read), Box::new(write)))
        }
        #[cfg(unix)]
        SocketAddress::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            let (read, write) = stream.into_split();
            Ok((Box::new(read), Box::new(write)))
        }
        #[cfg(not(unix))]
        SocketAddress::Unix(path) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unix sockets are not available on this platform: {}", path.display()),
        )),
    }
}
