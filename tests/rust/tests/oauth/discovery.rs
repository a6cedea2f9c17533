//! Remediation against real well-known metadata documents

use std::sync::Arc;

use keel_core::ConnectionStatusTracker;
use keel_mcp::{
    DiscoveryOrchestrator, HttpOAuthDiscovery, InMemoryTokenStore, InMemoryToolRegistry,
    OAuthRemediator, ServerConnector, TransportFactory,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::{start_sse_server, ConnectOutcome, MockOAuthProvider, ServerConfig, SseServerOptions};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_json(server: &MockServer, at: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn orchestrator(
    provider: Arc<MockOAuthProvider>,
    token_store: Arc<InMemoryTokenStore>,
) -> DiscoveryOrchestrator {
    DiscoveryOrchestrator::new(ServerConnector::new(
        Arc::new(ConnectionStatusTracker::new()),
        Arc::new(InMemoryToolRegistry::new()),
        TransportFactory::new(token_store),
        OAuthRemediator::new(Arc::new(HttpOAuthDiscovery::default()), provider),
    ))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resource_metadata_leads_to_authorization_server() {
    let resource = MockServer::start().await;
    let auth = MockServer::start().await;
    mount_json(
        &resource,
        "/.well-known/oauth-protected-resource",
        json!({
            "resource": resource.uri(),
            "authorization_servers": [auth.uri()],
            "scopes_supported": ["deploy"]
        }),
    )
    .await;
    mount_json(
        &auth,
        "/.well-known/oauth-authorization-server",
        json!({
            "issuer": auth.uri(),
            "authorization_endpoint": format!("{}/authorize", auth.uri()),
            "token_endpoint": format!("{}/token", auth.uri()),
            "registration_endpoint": format!("{}/register", auth.uri()),
            "scopes_supported": ["openid"]
        }),
    )
    .await;

    let server = start_sse_server(SseServerOptions {
        tools: vec!["deploy".to_string()],
        required_token: Some("fresh".to_string()),
        resource_metadata: Some(format!(
            "{}/.well-known/oauth-protected-resource",
            resource.uri()
        )),
    })
    .await;
    let token_store = Arc::new(InMemoryTokenStore::new());
    let provider = Arc::new(MockOAuthProvider::new(token_store.clone(), "fresh"));
    let orchestrator = orchestrator(provider.clone(), token_store.clone());
    let config = ServerConfig::sse(&server.url);

    let outcome = orchestrator.discover_one("deployer", &config).await;

    assert_eq!(outcome, ConnectOutcome::AuthRemediated);
    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    let client_config = &calls[0].1;
    assert_eq!(
        client_config.authorization_url,
        format!("{}/authorize", auth.uri())
    );
    assert_eq!(client_config.token_url, format!("{}/token", auth.uri()));
    assert_eq!(client_config.scopes, vec!["deploy".to_string()]);
    assert_eq!(
        client_config.registration_url,
        Some(format!("{}/register", auth.uri()))
    );

    let outcome = orchestrator.discover_one("deployer", &config).await;
    assert!(outcome.is_connected());

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_metadata_is_auth_failure() {
    let resource = MockServer::start().await;
    let server = start_sse_server(SseServerOptions {
        tools: vec!["deploy".to_string()],
        required_token: Some("fresh".to_string()),
        resource_metadata: Some(format!(
            "{}/.well-known/oauth-protected-resource",
            resource.uri()
        )),
    })
    .await;
    let token_store = Arc::new(InMemoryTokenStore::new());
    let provider = Arc::new(MockOAuthProvider::new(token_store.clone(), "fresh"));
    let orchestrator = orchestrator(provider.clone(), token_store);

    let outcome = orchestrator
        .discover_one("deployer", &ServerConfig::sse(&server.url))
        .await;

    assert!(matches!(outcome, ConnectOutcome::AuthFailed(_)));
    assert!(provider.calls().is_empty());

    server.shutdown();
}
