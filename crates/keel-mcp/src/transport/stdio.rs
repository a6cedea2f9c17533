//! STDIO transport for MCP servers
//!
//! Spawns the server as a child process speaking MCP over stdin/stdout. The
//! child's stderr is captured and forwarded to the log, never inherited.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use keel_core::ServerConfig;
use rmcp::transport::TokioChildProcess;
use rmcp::ServiceExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, info};

use super::complete_handshake;
use crate::client::{McpClient, McpClientHandler};
use crate::error::{ConnectError, TransportError};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Clone)]
pub struct StdioTransport {
    server_name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
}

impl StdioTransport {
    pub fn new(
        server_name: &str,
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            command,
            args,
            env,
            cwd,
        }
    }

    /// Build from a server config. A command line given without `args`
    /// (`"npx -y pkg"`) is split with shell-word rules.
    pub fn from_config(server_name: &str, config: &ServerConfig) -> Result<Self, TransportError> {
        let command = config
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(TransportError::MissingTransport)?;

        let (command, args) = if config.args.is_empty() && command.contains(char::is_whitespace) {
            parse_command_line(command)?
        } else {
            (command.to_string(), config.args.clone())
        };

        Ok(Self::new(
            server_name,
            command,
            args,
            config.env.clone(),
            config.cwd.clone(),
        ))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub(crate) async fn connect(self) -> Result<McpClient, ConnectError> {
        info!(
            server = %self.server_name,
            command = %self.command,
            "Starting STDIO server"
        );

        let mut command = Command::new(&self.command);
        command.args(&self.args).envs(&self.env).kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let (transport, stderr) = TokioChildProcess::builder(command)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ConnectError::Spawn)?;

        if let Some(stderr) = stderr {
            spawn_stderr_forwarder(self.server_name.clone(), stderr);
        }

        let handler = McpClientHandler::new(&self.server_name);
        complete_handshake(&self.server_name, handler.serve(transport)).await
    }
}

/// Split a command line into program and arguments.
pub fn parse_command_line(command_line: &str) -> Result<(String, Vec<String>), TransportError> {
    let mut parts = shell_words::split(command_line)
        .map_err(|e| TransportError::InvalidCommand {
            command: command_line.to_string(),
            reason: e.to_string(),
        })?
        .into_iter();
    let program = parts.next().ok_or_else(|| TransportError::InvalidCommand {
        command: command_line.to_string(),
        reason: "empty command".to_string(),
    })?;
    Ok((program, parts.collect()))
}

fn spawn_stderr_forwarder(server_name: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => debug!(server = %server_name, "[stderr] {}", line),
                Ok(None) => {
                    debug!(server = %server_name, "Server stderr closed");
                    break;
                }
                Err(e) => {
                    debug!(server = %server_name, error = %e, "Failed to read server stderr");
                    break;
                }
            }
        }
    });
}
