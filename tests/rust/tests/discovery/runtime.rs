//! Runtime status of live connections
//!
//! The server runs over an in-memory duplex pipe so the test controls exactly
//! when the peer goes away.

use std::sync::Arc;
use std::time::Duration;

use keel_core::{ConnectionStatus, ConnectionStatusTracker};
use keel_mcp::{McpClientHandler, McpConnection};
use pretty_assertions::assert_eq;
use rmcp::ServiceExt;
use tests::ToolServer;

#[tokio::test(flavor = "multi_thread")]
async fn test_peer_loss_marks_server_disconnected() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(async move {
        ToolServer::new("pipe", &["echo"])
            .serve(server_io)
            .await
            .expect("server handshake")
    });

    let client = McpClientHandler::new("pipe")
        .serve(client_io)
        .await
        .expect("client handshake");
    let server = server.await.unwrap();

    let tracker = Arc::new(ConnectionStatusTracker::new());
    tracker.set_status("pipe", ConnectionStatus::Connected);
    let connection = McpConnection::new("pipe", client, Duration::from_secs(5), tracker.clone());

    let tools = connection.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);

    server.cancel().await.unwrap();

    assert!(
        wait_for_status(&tracker, ConnectionStatus::Disconnected).await,
        "status never left {:?}",
        tracker.get_status("pipe")
    );

    let err = connection.call_tool("echo", None).await.unwrap_err();
    assert!(err.is_connection_failure(), "unexpected error: {}", err);
    assert_eq!(tracker.get_status("pipe"), ConnectionStatus::Disconnected);
}

/// Poll for up to two seconds.
async fn wait_for_status(tracker: &ConnectionStatusTracker, expected: ConnectionStatus) -> bool {
    for _ in 0..40 {
        if tracker.get_status("pipe") == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn test_errors_after_close_leave_status_alone() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(async move {
        ToolServer::new("pipe", &["echo"])
            .serve(server_io)
            .await
            .expect("server handshake")
    });
    let client = McpClientHandler::new("pipe")
        .serve(client_io)
        .await
        .expect("client handshake");
    let server = server.await.unwrap();

    let tracker = Arc::new(ConnectionStatusTracker::new());
    tracker.set_status("pipe", ConnectionStatus::Connected);
    let connection = McpConnection::new("pipe", client, Duration::from_secs(5), tracker.clone());

    connection.close().await;
    server.cancel().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = connection.call_tool("echo", None).await.unwrap_err();

    assert!(matches!(err, keel_mcp::McpError::Closed));
    assert!(connection.is_closed());
    assert_eq!(tracker.get_status("pipe"), ConnectionStatus::Connected);
}
