//! Streamable HTTP transport for MCP servers

use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::StatusCode;
use rmcp::model::ProtocolVersion;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::ServiceExt;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use super::{build_http_client, complete_handshake, http_status_error};
use crate::client::{McpClient, McpClientHandler};
use crate::error::{ConnectError, TransportError};
use crate::oauth::is_auth_challenge;

#[derive(Debug, Clone)]
pub struct StreamableHttpTransport {
    server_name: String,
    url: Url,
    header_count: usize,
    client: reqwest::Client,
}

impl StreamableHttpTransport {
    /// `headers` are sent with every request, including any bearer token.
    pub fn new(server_name: &str, url: Url, headers: HeaderMap) -> Result<Self, TransportError> {
        let header_count = headers.len();
        Ok(Self {
            server_name: server_name.to_string(),
            url,
            header_count,
            client: build_http_client(headers)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) async fn connect(self) -> Result<McpClient, ConnectError> {
        info!(
            server = %self.server_name,
            url = %self.url,
            header_count = self.header_count,
            "Connecting to Streamable HTTP server"
        );

        let config = StreamableHttpClientTransportConfig::with_uri(self.url.as_str());
        let transport = StreamableHttpClientTransport::with_client(self.client.clone(), config);

        let handler = McpClientHandler::new(&self.server_name);
        match complete_handshake(&self.server_name, handler.serve(transport)).await {
            Err(ConnectError::Handshake(message)) if is_auth_challenge(&message) => {
                Err(self.auth_challenge(message).await)
            }
            result => result,
        }
    }

    /// rmcp reports an authentication failure without the response headers.
    /// Repeat the initialize request to recover the `WWW-Authenticate` challenge.
    async fn auth_challenge(&self, message: String) -> ConnectError {
        debug!(
            server = %self.server_name,
            "Handshake rejected, fetching authentication challenge"
        );
        let response = self
            .client
            .post(self.url.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(&initialize_request())
            .send()
            .await;
        match response {
            Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                http_status_error(response).await
            }
            _ => ConnectError::Handshake(message),
        }
    }
}

fn initialize_request() -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": 0,
        "method": "initialize",
        "params": {
            "protocolVersion": ProtocolVersion::LATEST,
            "capabilities": {},
            "clientInfo": { "name": "keel", "version": env!("CARGO_PKG_VERSION") }
        }
    })
}
