//! Concurrent discovery, filtering and name resolution

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use keel_mcp::ToolRegistry;
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::{
    init_test_tracing, start_hanging_server, start_tool_server, ConnectOutcome, ConnectionStatus,
    DiscoveryState, Harness, ServerConfig,
};

fn with_timeout(mut config: ServerConfig, millis: u64) -> ServerConfig {
    config.timeout = Some(millis);
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hanging_server_does_not_block_the_others() {
    init_test_tracing();
    let files = start_tool_server("files", &["read_file", "write_file"]).await;
    let hanging = start_hanging_server().await;
    let web = start_tool_server("web", &["fetch"]).await;
    let harness = Harness::new();

    let mut servers = HashMap::new();
    servers.insert(
        "files".to_string(),
        ServerConfig::streamable_http(&files.url),
    );
    servers.insert(
        "hanging".to_string(),
        with_timeout(ServerConfig::streamable_http(&hanging.url), 300),
    );
    servers.insert("web".to_string(), ServerConfig::streamable_http(&web.url));

    let report = harness.orchestrator.discover(&servers, None).await.unwrap();

    assert!(report.get("files").unwrap().is_connected());
    assert!(report.get("web").unwrap().is_connected());
    assert!(matches!(
        report.get("hanging"),
        Some(ConnectOutcome::ConnectFailed(_))
    ));
    assert_eq!(report.tool_count(), 3);
    assert_eq!(report.connected_servers(), vec!["files", "web"]);

    assert_eq!(
        harness.orchestrator.get_status("files"),
        ConnectionStatus::Connected
    );
    assert_eq!(
        harness.orchestrator.get_status("web"),
        ConnectionStatus::Connected
    );
    assert_eq!(
        harness.orchestrator.get_status("hanging"),
        ConnectionStatus::Disconnected
    );
    assert_eq!(
        harness.orchestrator.get_discovery_state(),
        DiscoveryState::Completed
    );
    assert!(harness.registry.contains("read_file"));
    assert!(harness.registry.contains("fetch"));

    files.shutdown();
    hanging.shutdown();
    web.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_discovery_in_progress_while_servers_change_status() {
    let files = start_tool_server("files", &["read_file"]).await;
    let web = start_tool_server("web", &["fetch"]).await;
    let harness = Harness::new();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let tracker = Arc::downgrade(&harness.tracker);
    let sink = seen.clone();
    harness
        .orchestrator
        .add_status_change_listener(Arc::new(move |_: &str, _: ConnectionStatus| {
            if let Some(tracker) = Weak::upgrade(&tracker) {
                sink.lock().push(tracker.discovery_state());
            }
        }));

    let mut servers = HashMap::new();
    servers.insert("files".to_string(), ServerConfig::streamable_http(&files.url));
    servers.insert("web".to_string(), ServerConfig::streamable_http(&web.url));
    harness.orchestrator.discover(&servers, None).await.unwrap();

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|state| *state == DiscoveryState::InProgress));
    assert_eq!(
        harness.orchestrator.get_discovery_state(),
        DiscoveryState::Completed
    );

    files.shutdown();
    web.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_transitions_for_connected_server() {
    let server = start_tool_server("files", &["read_file"]).await;
    let harness = Harness::new();
    let log = harness.record_statuses();

    harness
        .orchestrator
        .discover_one("files", &ServerConfig::streamable_http(&server.url))
        .await;

    assert_eq!(
        log.for_server("files"),
        vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
    );

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_include_and_exclude_filters() {
    let server = start_tool_server("shell", &["run", "kill", "status"]).await;
    let harness = Harness::new();
    let config = ServerConfig {
        include_tools: Some(vec!["run(ls -la)".to_string(), "kill".to_string()]),
        exclude_tools: Some(vec!["kill".to_string()]),
        ..ServerConfig::streamable_http(&server.url)
    };

    let outcome = harness.orchestrator.discover_one("shell", &config).await;

    assert_eq!(
        outcome,
        ConnectOutcome::Registered {
            tools: vec!["run".to_string()]
        }
    );
    assert_eq!(harness.registry.len(), 1);
    assert!(!harness.registry.contains("kill"));
    assert!(!harness.registry.contains("status"));

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_everything_filtered_disconnects() {
    let server = start_tool_server("shell", &["run", "kill"]).await;
    let harness = Harness::new();
    let log = harness.record_statuses();
    let config = ServerConfig {
        exclude_tools: Some(vec!["run".to_string(), "kill".to_string()]),
        ..ServerConfig::streamable_http(&server.url)
    };

    let outcome = harness.orchestrator.discover_one("shell", &config).await;

    assert_eq!(outcome, ConnectOutcome::NoTools);
    assert!(harness.registry.is_empty());
    assert_eq!(
        log.for_server("shell"),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
        ]
    );

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_without_tools_disconnects() {
    let server = start_tool_server("idle", &[]).await;
    let harness = Harness::new();

    let outcome = harness
        .orchestrator
        .discover_one("idle", &ServerConfig::streamable_http(&server.url))
        .await;

    assert_eq!(outcome, ConnectOutcome::NoTools);
    assert_eq!(
        harness.orchestrator.get_status("idle"),
        ConnectionStatus::Disconnected
    );

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_colliding_names_get_server_prefix() {
    let alpha = start_tool_server("alpha", &["search"]).await;
    let beta = start_tool_server("beta", &["search", "index"]).await;
    let harness = Harness::new();

    harness
        .orchestrator
        .discover_one("alpha", &ServerConfig::streamable_http(&alpha.url))
        .await;
    let outcome = harness
        .orchestrator
        .discover_one("beta", &ServerConfig::streamable_http(&beta.url))
        .await;

    assert_eq!(
        outcome,
        ConnectOutcome::Registered {
            tools: vec!["beta__search".to_string(), "index".to_string()]
        }
    );
    let prefixed = harness.registry.get_tool("beta__search").unwrap();
    assert_eq!(prefixed.raw_name, "search");
    assert_eq!(prefixed.server_name, "beta");
    assert_eq!(harness.registry.get_tool("search").unwrap().server_name, "alpha");

    alpha.shutdown();
    beta.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rediscovery_replaces_previous_tools() {
    let server = start_tool_server("files", &["read_file"]).await;
    let harness = Harness::new();
    let config = ServerConfig::streamable_http(&server.url);

    harness.orchestrator.discover_one("files", &config).await;
    let first = harness.registry.get_tool("read_file").unwrap();

    let outcome = harness.orchestrator.discover_one("files", &config).await;

    assert_eq!(
        outcome,
        ConnectOutcome::Registered {
            tools: vec!["read_file".to_string()]
        }
    );
    let tools = harness.registry.get_tools_by_server("files");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].resolved_name, "read_file");
    assert!(!harness.registry.contains("files__read_file"));
    assert!(first.connection().is_closed());
    assert!(!tools[0].connection().is_closed());
    assert_eq!(
        harness.orchestrator.get_status("files"),
        ConnectionStatus::Connected
    );

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_collisions_stay_unique() {
    let alpha = start_tool_server("alpha", &["search"]).await;
    let beta = start_tool_server("beta", &["search"]).await;
    let harness = Harness::new();

    let mut servers = HashMap::new();
    servers.insert("alpha".to_string(), ServerConfig::streamable_http(&alpha.url));
    servers.insert("beta".to_string(), ServerConfig::streamable_http(&beta.url));

    harness.orchestrator.discover(&servers, None).await.unwrap();

    let mut names: Vec<String> = harness
        .registry
        .all_tools()
        .into_iter()
        .map(|tool| tool.resolved_name)
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert_eq!(names[1], "search");
    assert!(names[0] == "alpha__search" || names[0] == "beta__search");

    alpha.shutdown();
    beta.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_registered_schema_is_sanitized() {
    let server = start_tool_server("web", &["open_page"]).await;
    let harness = Harness::new();

    harness
        .orchestrator
        .discover_one("web", &ServerConfig::streamable_http(&server.url))
        .await;

    let tool = harness.registry.get_tool("open_page").unwrap();
    assert_eq!(
        tool.parameters,
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" }
            }
        })
    );
    assert_eq!(tool.description, "open_page from web");

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tool_carries_server_timeout_and_trust() {
    let server = start_tool_server("web", &["fetch"]).await;
    let harness = Harness::new();
    let config = ServerConfig {
        timeout: Some(5_000),
        trust: true,
        ..ServerConfig::streamable_http(&server.url)
    };

    harness.orchestrator.discover_one("web", &config).await;

    let tool = harness.registry.get_tool("fetch").unwrap();
    assert_eq!(tool.timeout, std::time::Duration::from_secs(5));
    assert!(tool.trust);

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unusable_configs_are_contained() {
    let server = start_tool_server("ok", &["ping"]).await;
    let harness = Harness::new();

    let mut servers = HashMap::new();
    servers.insert("ok".to_string(), ServerConfig::streamable_http(&server.url));
    servers.insert("empty".to_string(), ServerConfig::default());
    servers.insert(
        "bad-header".to_string(),
        ServerConfig {
            headers: HashMap::from([("bad header".to_string(), "x".to_string())]),
            ..ServerConfig::streamable_http(&server.url)
        },
    );

    let report = harness.orchestrator.discover(&servers, None).await.unwrap();

    assert!(report.get("ok").unwrap().is_connected());
    assert!(matches!(
        report.get("empty"),
        Some(ConnectOutcome::ConfigError(_))
    ));
    assert!(matches!(
        report.get("bad-header"),
        Some(ConnectOutcome::ConfigError(_))
    ));
    assert_eq!(
        harness.orchestrator.get_status("empty"),
        ConnectionStatus::Disconnected
    );
    assert_eq!(
        harness.orchestrator.get_discovery_state(),
        DiscoveryState::Completed
    );

    server.shutdown();
}
