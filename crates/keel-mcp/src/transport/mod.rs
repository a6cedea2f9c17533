//! Transport selection for MCP connections
//!
//! A server config maps onto exactly one of three transports:
//!
//! - `httpUrl` - Streamable HTTP
//! - `url` - legacy Server-Sent-Events
//! - `command` - child process over stdin/stdout
//!
//! Network fields take precedence over `command`. [`TransportFactory`] builds the
//! transport without connecting; [`Transport::connect`] performs the MCP handshake.

mod http;
mod sse;
mod stdio;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keel_core::{ServerConfig, TokenStore, TransportKind};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use tracing::{debug, warn};

pub use http::StreamableHttpTransport;
pub use sse::{SseEvent, SseEventParser, SseTransport};
pub use stdio::{parse_command_line, StdioTransport};

use crate::client::McpClient;
use crate::error::{ConnectError, TransportError};

/// Error bodies kept in [`ConnectError::HttpStatus`] are cut to this many bytes.
const MAX_ERROR_BODY_LEN: usize = 512;

/// A transport ready to connect to one server.
#[derive(Debug)]
pub enum Transport {
    Stdio(StdioTransport),
    Sse(SseTransport),
    StreamableHttp(StreamableHttpTransport),
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Stdio(_) => TransportKind::Stdio,
            Transport::Sse(_) => TransportKind::Sse,
            Transport::StreamableHttp(_) => TransportKind::StreamableHttp,
        }
    }

    /// Short description for logs, e.g. `stdio:node` or `http:https://host/mcp`.
    pub fn description(&self) -> String {
        match self {
            Transport::Stdio(t) => format!("stdio:{}", t.command()),
            Transport::Sse(t) => format!("sse:{}", t.url()),
            Transport::StreamableHttp(t) => format!("http:{}", t.url()),
        }
    }

    /// Start the transport and complete the MCP handshake within `timeout`.
    pub async fn connect(self, timeout: Duration) -> Result<McpClient, ConnectError> {
        debug!(transport = %self.description(), timeout = ?timeout, "Connecting");
        let connect = async move {
            match self {
                Transport::Stdio(t) => t.connect().await,
                Transport::Sse(t) => t.connect().await,
                Transport::StreamableHttp(t) => t.connect().await,
            }
        };
        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout(timeout)),
        }
    }
}

/// Builds transports from server configs, attaching cached OAuth tokens to
/// network transports.
#[derive(Clone)]
pub struct TransportFactory {
    token_store: Arc<dyn TokenStore>,
}

impl TransportFactory {
    pub fn new(token_store: Arc<dyn TokenStore>) -> Self {
        Self { token_store }
    }

    pub async fn build(
        &self,
        server_name: &str,
        config: &ServerConfig,
    ) -> Result<Transport, TransportError> {
        let kind = config
            .transport_kind()
            .ok_or(TransportError::MissingTransport)?;

        match kind {
            TransportKind::StreamableHttp | TransportKind::Sse => {
                let url = config
                    .network_url()
                    .ok_or(TransportError::MissingTransport)?;
                let url = url::Url::parse(url).map_err(|source| TransportError::InvalidUrl {
                    url: url.to_string(),
                    source,
                })?;
                let token = self.cached_token(server_name, config).await;
                let headers = build_header_map(&config.headers, token.as_deref())?;

                if kind == TransportKind::StreamableHttp {
                    Ok(Transport::StreamableHttp(StreamableHttpTransport::new(
                        server_name,
                        url,
                        headers,
                    )?))
                } else {
                    Ok(Transport::Sse(SseTransport::new(server_name, url, headers)?))
                }
            }
            TransportKind::Stdio => Ok(Transport::Stdio(StdioTransport::from_config(
                server_name,
                config,
            )?)),
        }
    }

    async fn cached_token(&self, server_name: &str, config: &ServerConfig) -> Option<String> {
        let settings = config.oauth.clone().unwrap_or_default();
        match self.token_store.get_valid_token(server_name, &settings).await {
            Ok(Some(token)) => {
                debug!(server = %server_name, "Attaching stored OAuth token");
                Some(token)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    server = %server_name,
                    error = %e,
                    "Failed to read stored OAuth token, connecting without it"
                );
                None
            }
        }
    }
}

/// Static headers plus an optional bearer token. The token replaces any configured
/// `Authorization` header.
pub fn build_header_map(
    headers: &HashMap<String, String>,
    bearer_token: Option<&str>,
) -> Result<HeaderMap, TransportError> {
    let mut header_map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| TransportError::InvalidHeaderName(key.clone()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| TransportError::InvalidHeaderValue(key.clone()))?;
        header_map.insert(name, value);
    }
    if let Some(token) = bearer_token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| TransportError::InvalidHeaderValue(AUTHORIZATION.to_string()))?;
        value.set_sensitive(true);
        header_map.insert(AUTHORIZATION, value);
    }
    Ok(header_map)
}

pub(crate) fn build_http_client(headers: HeaderMap) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .map_err(TransportError::HttpClient)
}

/// Turn a non-success response into [`ConnectError::HttpStatus`], keeping the
/// `WWW-Authenticate` challenge and the start of the body.
pub(crate) async fn http_status_error(response: reqwest::Response) -> ConnectError {
    let status = response.status().as_u16();
    let www_authenticate = response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut body = response.text().await.unwrap_or_default();
    truncate_in_place(&mut body, MAX_ERROR_BODY_LEN);
    ConnectError::HttpStatus {
        status,
        www_authenticate,
        body,
    }
}

fn truncate_in_place(text: &mut String, max_len: usize) {
    if text.len() > max_len {
        let mut cut = max_len;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
}

/// Await the rmcp handshake, flattening the error chain into the message so that
/// HTTP status details survive.
pub(crate) async fn complete_handshake<F, E>(
    server_name: &str,
    serve: F,
) -> Result<McpClient, ConnectError>
where
    F: Future<Output = Result<McpClient, E>>,
    E: StdError,
{
    match serve.await {
        Ok(client) => {
            if let Some(info) = client.peer_info() {
                debug!(
                    server = %server_name,
                    remote = %info.server_info.name,
                    version = %info.server_info.version,
                    "MCP handshake complete"
                );
            }
            Ok(client)
        }
        Err(e) => Err(ConnectError::Handshake(error_chain(&e))),
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
