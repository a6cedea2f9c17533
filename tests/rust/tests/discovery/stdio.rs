//! Stdio servers spawned as real child processes

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use keel_mcp::ToolRegistry;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rmcp::model::RawContent;
use serde_json::json;
use tests::{ConnectionStatus, Harness, ServerConfig, STDERR_BANNER, UNSET};

fn env_server() -> ServerConfig {
    ServerConfig::stdio(
        env!("CARGO_BIN_EXE_keel-test-stdio-server"),
        vec!["--stdio".to_string()],
    )
}

async fn call_text(harness: &Harness, tool: &str, arguments: serde_json::Value) -> String {
    let tool = harness.registry.get_tool(tool).unwrap();
    let result = tool.execute(arguments).await.unwrap();
    match &result.content[0].raw {
        RawContent::Text(text) => text.text.clone(),
        other => panic!("expected text content, got {:?}", other),
    }
}

async fn get_env(harness: &Harness, name: &str) -> String {
    call_text(harness, "get_env", json!({ "name": name })).await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_child_sees_parent_env_with_config_overrides() {
    std::env::set_var("KEEL_STDIO_TEST_INHERITED", "parent");
    std::env::set_var("KEEL_STDIO_TEST_SHADOWED", "parent");
    let harness = Harness::new();
    let config = ServerConfig {
        env: HashMap::from([
            ("KEEL_STDIO_TEST_SHADOWED".to_string(), "config".to_string()),
            ("KEEL_STDIO_TEST_ADDED".to_string(), "config".to_string()),
        ]),
        ..env_server()
    };

    let outcome = harness.orchestrator.discover_one("env", &config).await;

    assert!(outcome.is_connected(), "unexpected outcome: {:?}", outcome);
    assert_eq!(get_env(&harness, "KEEL_STDIO_TEST_INHERITED").await, "parent");
    assert_eq!(get_env(&harness, "KEEL_STDIO_TEST_SHADOWED").await, "config");
    assert_eq!(get_env(&harness, "KEEL_STDIO_TEST_ADDED").await, "config");
    assert_eq!(get_env(&harness, "KEEL_STDIO_TEST_NEVER_SET").await, UNSET);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_child_runs_in_configured_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    let config = ServerConfig {
        cwd: Some(dir.path().to_path_buf()),
        ..env_server()
    };

    harness.orchestrator.discover_one("env", &config).await;
    let cwd = call_text(&harness, "get_cwd", json!({})).await;

    assert_eq!(
        PathBuf::from(cwd).canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );
    assert_eq!(
        harness.orchestrator.get_status("env"),
        ConnectionStatus::Connected
    );
}

/// Clonable log sink for a scoped subscriber.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// current_thread keeps the stderr forwarder on the thread holding the subscriber.
#[tokio::test]
async fn test_child_stderr_is_logged_not_inherited() {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);
    let harness = Harness::new();

    let outcome = harness.orchestrator.discover_one("env", &env_server()).await;
    assert!(outcome.is_connected(), "unexpected outcome: {:?}", outcome);

    let mut logged = false;
    for _ in 0..40 {
        if capture.contents().contains(STDERR_BANNER) {
            logged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let output = capture.contents();
    assert!(logged, "stderr line missing from log:\n{}", output);
    let line = output
        .lines()
        .find(|line| line.contains(STDERR_BANNER))
        .unwrap();
    assert!(line.contains("[stderr]"));
    assert!(line.contains("server=env"));
}
