//! Legacy Server-Sent-Events transport (MCP 2024-11-05)
//!
//! The client opens a `GET` event stream. The server's first `endpoint` event names
//! the URL the client `POST`s its JSON-RPC messages to; responses and notifications
//! arrive as `message` events on the stream.
//!
//! The HTTP status of the initial `GET` is surfaced as
//! [`ConnectError::HttpStatus`], which is how authentication challenges are seen.

use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use reqwest::header::{HeaderMap, ACCEPT};
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use rmcp::ServiceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{build_http_client, complete_handshake, http_status_error};
use crate::client::{McpClient, McpClientHandler};
use crate::error::{ConnectError, TransportError};

const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct SseTransport {
    server_name: String,
    url: Url,
    client: reqwest::Client,
}

impl SseTransport {
    pub fn new(server_name: &str, url: Url, headers: HeaderMap) -> Result<Self, TransportError> {
        Ok(Self {
            server_name: server_name.to_string(),
            url,
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
            "Connecting to SSE server"
        );

        let mut events = self.open_stream().await?;
        let endpoint = self.wait_for_endpoint(&mut events).await?;
        debug!(server = %self.server_name, endpoint = %endpoint, "SSE endpoint received");

        let cancel = CancellationToken::new();
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<ClientJsonRpcMessage>(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel::<ServerJsonRpcMessage>(CHANNEL_CAPACITY);

        tokio::spawn(read_events(
            self.server_name.clone(),
            events,
            incoming_tx,
            cancel.clone(),
        ));
        tokio::spawn(post_messages(
            self.server_name.clone(),
            self.client.clone(),
            endpoint,
            outgoing_rx,
            cancel,
        ));

        let handler = McpClientHandler::new(&self.server_name);
        complete_handshake(&self.server_name, handler.serve((outgoing_tx, incoming_rx))).await
    }

    async fn open_stream(&self) -> Result<SseEventStream, ConnectError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(ConnectError::Http)?;

        if !response.status().is_success() {
            return Err(http_status_error(response).await);
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(SseEventStream::new(bytes))
    }

    async fn wait_for_endpoint(&self, events: &mut SseEventStream) -> Result<Url, ConnectError> {
        loop {
            match events.next_event().await.map_err(ConnectError::Http)? {
                Some(event) if event.event == "endpoint" => {
                    let target = event.data.trim();
                    return self.url.join(target).map_err(|e| {
                        ConnectError::Stream(format!("invalid endpoint '{}': {}", target, e))
                    });
                }
                Some(event) => {
                    debug!(
                        server = %self.server_name,
                        event = %event.event,
                        "Ignoring SSE event before endpoint"
                    );
                }
                None => {
                    return Err(ConnectError::Stream(
                        "stream ended before the endpoint event".to_string(),
                    ))
                }
            }
        }
    }
}

async fn read_events(
    server_name: String,
    mut events: SseEventStream,
    mut incoming: mpsc::Sender<ServerJsonRpcMessage>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = events.next_event() => next,
        };
        match next {
            Ok(Some(event)) if event.event == "message" => {
                match serde_json::from_str::<ServerJsonRpcMessage>(&event.data) {
                    Ok(message) => {
                        if incoming.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(
                        server = %server_name,
                        error = %e,
                        "Dropping malformed SSE message"
                    ),
                }
            }
            Ok(Some(event)) => {
                debug!(server = %server_name, event = %event.event, "Ignoring SSE event");
            }
            Ok(None) => {
                info!(server = %server_name, "SSE stream closed by server");
                break;
            }
            Err(e) => {
                warn!(server = %server_name, error = %e, "SSE stream failed");
                break;
            }
        }
    }
    cancel.cancel();
}

async fn post_messages(
    server_name: String,
    client: reqwest::Client,
    endpoint: Url,
    mut outgoing: mpsc::Receiver<ClientJsonRpcMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = outgoing.next() => message,
        };
        let Some(message) = message else {
            break;
        };
        match client.post(endpoint.clone()).json(&message).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(
                    server = %server_name,
                    status = %response.status(),
                    "SSE server rejected message"
                );
                if response.status().is_client_error() {
                    break;
                }
            }
            Err(e) => {
                warn!(server = %server_name, error = %e, "Failed to post message to SSE server");
                break;
            }
        }
    }
    cancel.cancel();
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the server did not name one.
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Bytes are buffered until a full line is available, so multi-byte characters
/// split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseEventParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    ready: std::collections::VecDeque<SseEvent>,
}

impl SseEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            self.process_line(&line);
        }
    }

    pub fn next_event(&mut self) -> Option<SseEvent> {
        self.ready.pop_front()
    }

    fn process_line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch();
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) {
        let event = self.event.take();
        if self.data.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        self.ready.push_back(SseEvent {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data,
        });
    }
}

struct SseEventStream {
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    parser: SseEventParser,
}

impl SseEventStream {
    fn new(bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> Self {
        Self {
            bytes,
            parser: SseEventParser::new(),
        }
    }

    async fn next_event(&mut self) -> Result<Option<SseEvent>, reqwest::Error> {
        loop {
            if let Some(event) = self.parser.next_event() {
                return Ok(Some(event));
            }
            match self.bytes.next().await {
                Some(chunk) => self.parser.feed(&chunk?),
                None => return Ok(None),
            }
        }
    }
}
