//! OAuth token persistence
//!
//! [`FileTokenStore`] keeps one JSON object mapping server names to tokens. Expired
//! tokens are refreshed transparently when the stored token has a refresh token and
//! the server's settings name a token endpoint and client id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use keel_core::{config_dir, OAuthSettings, OAuthToken, TokenStore};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::flow::OAuthFlow;

pub const TOKEN_FILE_NAME: &str = "mcp-oauth-tokens.json";

type TokenMap = HashMap<String, OAuthToken>;

/// Refresh `token` when it is expired and the settings allow it. `None` means
/// the token is unusable.
async fn usable_token(
    http: &reqwest::Client,
    server_name: &str,
    token: OAuthToken,
    settings: &OAuthSettings,
) -> Option<OAuthToken> {
    if !token.is_expired() {
        return Some(token);
    }

    let (Some(refresh_token), Some(token_url), Some(client_id)) = (
        token.refresh_token.as_deref(),
        settings.token_url.as_deref(),
        settings.client_id.as_deref(),
    ) else {
        debug!(server = %server_name, "Stored OAuth token expired and cannot be refreshed");
        return None;
    };

    let flow = OAuthFlow::new(
        settings.authorization_url.clone().unwrap_or_default(),
        token_url,
        client_id,
        settings.client_secret.clone(),
    );
    match flow.refresh_token(http, refresh_token).await {
        Ok(refreshed) => {
            info!(server = %server_name, "Refreshed OAuth token");
            Some(refreshed)
        }
        Err(e) => {
            warn!(server = %server_name, error = %e, "Failed to refresh OAuth token");
            None
        }
    }
}

/// Tokens persisted in `<config dir>/keel/mcp-oauth-tokens.json`.
pub struct FileTokenStore {
    path: PathBuf,
    http: reqwest::Client,
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            http: reqwest::Client::new(),
            lock: Mutex::new(()),
        }
    }

    pub fn default_path() -> PathBuf {
        config_dir().join(TOKEN_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> anyhow::Result<TokenMap> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(TokenMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TokenMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, tokens: &TokenMap) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(tokens)?;
        tokio::fs::write(&self.path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get_valid_token(
        &self,
        server_name: &str,
        settings: &OAuthSettings,
    ) -> anyhow::Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let mut tokens = self.read().await?;
        let Some(token) = tokens.get(server_name).cloned() else {
            return Ok(None);
        };

        let was_expired = token.is_expired();
        let Some(token) = usable_token(&self.http, server_name, token, settings).await else {
            return Ok(None);
        };
        let access_token = token.access_token.clone();
        if was_expired {
            tokens.insert(server_name.to_string(), token);
            self.write(&tokens).await?;
        }
        Ok(Some(access_token))
    }

    async fn save_token(&self, server_name: &str, token: OAuthToken) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut tokens = self.read().await?;
        tokens.insert(server_name.to_string(), token);
        self.write(&tokens).await?;
        debug!(server = %server_name, path = %self.path.display(), "Saved OAuth token");
        Ok(())
    }

    async fn remove_token(&self, server_name: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut tokens = self.read().await?;
        if tokens.remove(server_name).is_some() {
            self.write(&tokens).await?;
        }
        Ok(())
    }
}

/// Process-local token store.
#[derive(Default)]
pub struct InMemoryTokenStore {
    http: reqwest::Client,
    tokens: Mutex<TokenMap>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn token(&self, server_name: &str) -> Option<OAuthToken> {
        self.tokens.lock().await.get(server_name).cloned()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get_valid_token(
        &self,
        server_name: &str,
        settings: &OAuthSettings,
    ) -> anyhow::Result<Option<String>> {
        let mut tokens = self.tokens.lock().await;
        let Some(token) = tokens.get(server_name).cloned() else {
            return Ok(None);
        };
        let Some(token) = usable_token(&self.http, server_name, token, settings).await else {
            return Ok(None);
        };
        let access_token = token.access_token.clone();
        tokens.insert(server_name.to_string(), token);
        Ok(Some(access_token))
    }

    async fn save_token(&self, server_name: &str, token: OAuthToken) -> anyhow::Result<()> {
        self.tokens
            .lock()
            .await
            .insert(server_name.to_string(), token);
        Ok(())
    }

    async fn remove_token(&self, server_name: &str) -> anyhow::Result<()> {
        self.tokens.lock().await.remove(server_name);
        Ok(())
    }
}
