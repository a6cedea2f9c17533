//! Interactive OAuth through the system browser
//!
//! Callbacks are received on a loopback HTTP server (RFC 8252 section 7.3). The
//! preferred port keeps the redirect URI stable across runs, which matters for
//! servers that registered it dynamically.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::extract::Query;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use keel_core::{OAuthClientConfig, OAuthProvider, TokenStore};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use super::flow::{register_client, AuthorizationCallback, OAuthFlow};

pub const DEFAULT_CALLBACK_PORT: u16 = 7777;
pub const CALLBACK_PATH: &str = "/oauth/callback";
/// Time the user has to finish in the browser.
pub const DEFAULT_OAUTH_TIMEOUT: Duration = Duration::from_secs(300);

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Keel</title></head>\
<body><h1>Authentication complete</h1><p>You can close this window and return to Keel.</p></body></html>";
const FAILURE_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Keel</title></head>\
<body><h1>Authentication failed</h1><p>Check the Keel log for details.</p></body></html>";

/// Opens the authorization URL for the user.
pub type UrlOpener = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// [`OAuthProvider`] running the authorization-code + PKCE flow in the browser.
pub struct BrowserOAuthProvider {
    http: reqwest::Client,
    token_store: Arc<dyn TokenStore>,
    callback_port: u16,
    timeout: Duration,
    opener: UrlOpener,
}

impl BrowserOAuthProvider {
    pub fn new(token_store: Arc<dyn TokenStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_store,
            callback_port: DEFAULT_CALLBACK_PORT,
            timeout: DEFAULT_OAUTH_TIMEOUT,
            opener: Arc::new(|url: &str| -> anyhow::Result<()> {
                open::that(url)?;
                Ok(())
            }),
        }
    }

    /// Preferred loopback port; `0` always picks a free one.
    pub fn with_callback_port(mut self, port: u16) -> Self {
        self.callback_port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_opener(mut self, opener: UrlOpener) -> Self {
        self.opener = opener;
        self
    }

    /// Bind the callback listener and return it with the redirect URI it serves.
    async fn bind_callback(
        &self,
        config: &OAuthClientConfig,
    ) -> anyhow::Result<(TcpListener, Url)> {
        if let Some(redirect_uri) = &config.redirect_uri {
            let url = Url::parse(redirect_uri)
                .with_context(|| format!("Invalid redirect URI '{}'", redirect_uri))?;
            let port = url.port_or_known_default().unwrap_or(DEFAULT_CALLBACK_PORT);
            let listener = TcpListener::bind(("127.0.0.1", port))
                .await
                .with_context(|| format!("Failed to bind OAuth callback port {}", port))?;
            return Ok((listener, url));
        }

        let listener = try_bind_with_fallback(self.callback_port).await?;
        let port = listener.local_addr()?.port();
        let url = Url::parse(&format!("http://127.0.0.1:{}{}", port, CALLBACK_PATH))?;
        Ok((listener, url))
    }

    async fn client_credentials(
        &self,
        config: &OAuthClientConfig,
        redirect_uri: &str,
    ) -> anyhow::Result<(String, Option<String>)> {
        if let Some(client_id) = &config.client_id {
            return Ok((client_id.clone(), config.client_secret.clone()));
        }
        let Some(registration_url) = &config.registration_url else {
            anyhow::bail!(
                "No OAuth client id configured and the server does not support dynamic client registration"
            );
        };
        let client =
            register_client(&self.http, registration_url, redirect_uri, &config.scopes).await?;
        Ok((client.client_id, client.client_secret))
    }
}

#[async_trait]
impl OAuthProvider for BrowserOAuthProvider {
    async fn authenticate(
        &self,
        server_name: &str,
        config: &OAuthClientConfig,
    ) -> anyhow::Result<()> {
        let (listener, redirect_url) = self.bind_callback(config).await?;
        let redirect_uri = redirect_url.to_string();

        let (client_id, client_secret) = self.client_credentials(config, &redirect_uri).await?;
        let flow = OAuthFlow::new(
            config.authorization_url.clone(),
            config.token_url.clone(),
            client_id,
            client_secret,
        );
        let request = flow.create_authorization_request(&redirect_uri, &config.scopes)?;

        let (callback_rx, shutdown_tx) =
            serve_callback(listener, redirect_url.path(), request.state.clone());

        info!(
            server = %server_name,
            url = %request.authorization_url,
            "Open this URL in your browser to authenticate"
        );
        if let Err(e) = (self.opener)(&request.authorization_url) {
            warn!(server = %server_name, error = %e, "Failed to open browser");
        }

        let waited = tokio::time::timeout(self.timeout, callback_rx).await;
        let _ = shutdown_tx.send(());
        let callback = match waited {
            Ok(Ok(callback)) => callback,
            Ok(Err(_)) => anyhow::bail!("OAuth callback server stopped before a callback arrived"),
            Err(_) => anyhow::bail!("OAuth authorization timed out after {:?}", self.timeout),
        };

        if let Some(message) = callback.error_message() {
            anyhow::bail!("Authorization denied: {}", message);
        }
        let code = callback
            .code
            .context("Authorization callback did not include a code")?;

        let token = flow
            .exchange_code(&self.http, &code, &redirect_uri, &request.pkce_verifier)
            .await?;
        self.token_store.save_token(server_name, token).await?;
        info!(server = %server_name, "OAuth token stored");
        Ok(())
    }
}

async fn try_bind_with_fallback(preferred_port: u16) -> anyhow::Result<TcpListener> {
    match TcpListener::bind(("127.0.0.1", preferred_port)).await {
        Ok(listener) => Ok(listener),
        Err(_) => {
            info!(
                port = preferred_port,
                "Preferred OAuth callback port unavailable, allocating dynamic port"
            );
            TcpListener::bind("127.0.0.1:0")
                .await
                .context("Failed to bind loopback callback server")
        }
    }
}

/// Serve callbacks on `listener`. The first request on `path` carrying
/// `expected_state` is forwarded. Requests with any other state are answered
/// and dropped, so a forged redirect cannot end the flow.
fn serve_callback(
    listener: TcpListener,
    path: &str,
    expected_state: String,
) -> (oneshot::Receiver<AuthorizationCallback>, oneshot::Sender<()>) {
    let (callback_tx, callback_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let sender = Arc::new(Mutex::new(Some(callback_tx)));

    let app = Router::new().route(
        path,
        get(move |Query(callback): Query<AuthorizationCallback>| {
            let sender = sender.clone();
            let expected_state = expected_state.clone();
            async move {
                if callback.state != expected_state {
                    warn!("Ignoring OAuth callback with unexpected state");
                    return Html(FAILURE_PAGE);
                }
                let page = if callback.error.is_some() {
                    FAILURE_PAGE
                } else {
                    SUCCESS_PAGE
                };
                match sender.lock().take() {
                    Some(tx) => {
                        let _ = tx.send(callback);
                    }
                    None => debug!("Ignoring repeated OAuth callback"),
                }
                Html(page)
            }
        }),
    );

    tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %e, "OAuth callback server failed");
        }
    });

    (callback_rx, shutdown_tx)
}
