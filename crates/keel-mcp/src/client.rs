//! Live MCP connections
//!
//! [`McpConnection`] wraps the rmcp client service of one server. Every remote call
//! carries the server's timeout, and transport-level failures flip the server to
//! `Disconnected` in the status tracker.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keel_core::{ConnectionStatus, ConnectionStatusTracker};
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ClientInfo, Implementation, JsonObject, LoggingLevel,
    LoggingMessageNotificationParam, Tool,
};
use rmcp::service::{NotificationContext, Peer, RunningService, RunningServiceCancellationToken};
use rmcp::RoleClient;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::McpError;

/// rmcp client service for one server.
pub type McpClient = RunningService<RoleClient, McpClientHandler>;

/// Client-side handler: identifies Keel during the handshake and forwards server
/// notifications to the log.
#[derive(Clone)]
pub struct McpClientHandler {
    info: ClientInfo,
    server_name: String,
}

impl std::fmt::Debug for McpClientHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClientHandler")
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl McpClientHandler {
    pub fn new(server_name: &str) -> Self {
        Self {
            info: ClientInfo {
                client_info: Implementation {
                    name: "keel".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            server_name: server_name.to_string(),
        }
    }
}

impl rmcp::ClientHandler for McpClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }

    fn on_tool_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        let server_name = self.server_name.clone();
        async move {
            // Registered tools stay as discovered; a new discovery run picks up changes.
            info!(server = %server_name, "Server reported tools/list_changed");
        }
    }

    fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        let server_name = self.server_name.clone();
        async move {
            let message = match &params.data {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let logger = params.logger.as_deref().unwrap_or("-");
            match params.level {
                LoggingLevel::Debug => {
                    debug!(server = %server_name, logger, "{}", message)
                }
                LoggingLevel::Info | LoggingLevel::Notice => {
                    info!(server = %server_name, logger, "{}", message)
                }
                LoggingLevel::Warning => {
                    warn!(server = %server_name, logger, "{}", message)
                }
                LoggingLevel::Error
                | LoggingLevel::Critical
                | LoggingLevel::Alert
                | LoggingLevel::Emergency => {
                    error!(server = %server_name, logger, "{}", message)
                }
            }
        }
    }
}

/// A live connection to one MCP server, shared by every tool it registered.
///
/// A background task waits on the rmcp service. When the service ends without
/// [`McpConnection::close`] having been called (peer exited, stream dropped), the
/// server is marked `Disconnected` right away.
pub struct McpConnection {
    server_name: String,
    peer: Peer<RoleClient>,
    shutdown: parking_lot::Mutex<Option<RunningServiceCancellationToken>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
    tracker: Arc<ConnectionStatusTracker>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for McpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpConnection")
            .field("server_name", &self.server_name)
            .field("timeout", &self.timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl McpConnection {
    /// Take ownership of a connected client. Must be called inside a Tokio runtime.
    pub fn new(
        server_name: &str,
        client: McpClient,
        timeout: Duration,
        tracker: Arc<ConnectionStatusTracker>,
    ) -> Self {
        let peer = client.peer().clone();
        let shutdown = client.cancellation_token();
        let closed = Arc::new(AtomicBool::new(false));
        let watcher = tokio::spawn(watch_service(
            server_name.to_string(),
            client,
            closed.clone(),
            tracker.clone(),
        ));
        Self {
            server_name: server_name.to_string(),
            peer,
            shutdown: parking_lot::Mutex::new(Some(shutdown)),
            watcher: Mutex::new(Some(watcher)),
            timeout,
            tracker,
            closed,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// `tools/list`, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        self.request("tools/list", self.peer.list_all_tools()).await
    }

    /// `tools/call` with the server's raw tool name.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, McpError> {
        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments,
            task: None,
            meta: None,
        };
        debug!(server = %self.server_name, tool = %name, "Calling tool");
        self.request("tools/call", self.peer.call_tool(params)).await
    }

    async fn request<T, F>(&self, operation: &'static str, call: F) -> Result<T, McpError>
    where
        F: Future<Output = Result<T, rmcp::service::ServiceError>>,
    {
        if self.is_closed() {
            return Err(McpError::Closed);
        }

        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(McpError::from(e)),
            Err(_) => Err(McpError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        };

        if let Err(e) = &result {
            self.on_error(operation, e);
        }
        result
    }

    /// A failed request on a broken transport marks the server disconnected.
    /// There is no automatic reconnect.
    fn on_error(&self, operation: &str, err: &McpError) {
        if !err.is_connection_failure() || self.is_closed() {
            warn!(
                server = %self.server_name,
                operation,
                error = %err,
                "MCP request failed"
            );
            return;
        }
        error!(
            server = %self.server_name,
            operation,
            error = %err,
            "MCP connection error"
        );
        self.tracker.set_status(&self.server_name, ConnectionStatus::Disconnected);
    }

    /// Shut the connection down. Later calls fail with [`McpError::Closed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(shutdown) = self.shutdown.lock().take() {
            shutdown.cancel();
        }
        let watcher = self.watcher.lock().await.take();
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                warn!(
                    server = %self.server_name,
                    error = %e,
                    "Error while closing MCP connection"
                );
            }
        }
    }
}

/// Wait for the service to end and report it unless it was closed on purpose.
async fn watch_service(
    server_name: String,
    service: McpClient,
    closed: Arc<AtomicBool>,
    tracker: Arc<ConnectionStatusTracker>,
) {
    let reason = service.waiting().await;
    if closed.load(Ordering::SeqCst) {
        debug!(server = %server_name, reason = ?reason, "MCP connection closed");
        return;
    }
    error!(
        server = %server_name,
        reason = ?reason,
        "MCP connection lost"
    );
    tracker.set_status(&server_name, ConnectionStatus::Disconnected);
}
