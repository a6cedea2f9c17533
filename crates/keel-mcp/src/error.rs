//! Error types for the MCP client pipeline

use std::time::Duration;

use rmcp::service::ServiceError;
use thiserror::Error;

/// Building a transport from a server config failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No transport configured: set one of 'command', 'url' or 'httpUrl'")]
    MissingTransport,

    #[error("Invalid command line '{command}': {reason}")]
    InvalidCommand { command: String, reason: String },

    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid header name '{0}'")]
    InvalidHeaderName(String),

    #[error("Invalid header value for '{0}'")]
    InvalidHeaderValue(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Connecting to a server (transport start + MCP handshake) failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Connection timeout ({0:?})")]
    Timeout(Duration),

    #[error("Failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    /// Non-success HTTP status while opening the transport.
    #[error("{}", http_status_message(.status, .www_authenticate, .body))]
    HttpStatus {
        status: u16,
        www_authenticate: Option<String>,
        body: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Invalid SSE stream: {0}")]
    Stream(String),

    #[error("MCP handshake failed: {0}")]
    Handshake(String),
}

fn http_status_message(status: &u16, www_authenticate: &Option<String>, body: &str) -> String {
    let mut message = format!("Unexpected HTTP status {}", status);
    if let Some(challenge) = www_authenticate {
        message.push_str(&format!(" (www-authenticate: {})", challenge));
    }
    if !body.is_empty() {
        message.push_str(&format!(": {}", body));
    }
    message
}

/// A remote call on a live connection failed.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP request '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The server answered with an MCP error.
    #[error("MCP server error: {0}")]
    Server(String),

    /// The connection itself failed (transport closed, I/O error, ...).
    #[error("MCP transport error: {0}")]
    Transport(String),

    #[error("Connection is closed")]
    Closed,
}

impl McpError {
    /// Errors that mean the connection can no longer be used.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, McpError::Transport(_) | McpError::Closed)
    }
}

impl From<ServiceError> for McpError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::McpError(data) => McpError::Server(data.message.to_string()),
            other => McpError::Transport(other.to_string()),
        }
    }
}

/// The only discovery failure that escapes the orchestrator.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Invalid MCP server command '{command}': {reason}")]
    InvalidServerCommand { command: String, reason: String },
}
