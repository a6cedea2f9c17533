//! OAuth contracts used by the connection pipeline
//!
//! The connector never talks to an authorization server directly. It goes through
//! three collaborators:
//!
//! - [`TokenStore`] - cached bearer tokens, keyed by server name
//! - [`OAuthDiscovery`] - authorization-server metadata lookup
//! - [`OAuthProvider`] - runs the interactive authentication flow

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::OAuthSettings;

/// Tokens expiring within this window are treated as expired.
pub const TOKEN_EXPIRY_BUFFER_SECS: i64 = 300;

/// Stored OAuth token for one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuthToken {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
            expires_at: None,
            scope: None,
        }
    }

    /// Expired or about to expire (5 minute buffer). Tokens without expiry never expire.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                expires_at - Duration::seconds(TOKEN_EXPIRY_BUFFER_SECS) < Utc::now()
            }
            None => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

/// Authorization-server metadata found by [`OAuthDiscovery`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredOAuthMetadata {
    pub authorization_url: String,
    pub token_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_url: Option<String>,
}

/// Complete client configuration handed to an [`OAuthProvider`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OAuthClientConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub authorization_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub redirect_uri: Option<String>,
    pub registration_url: Option<String>,
}

impl OAuthClientConfig {
    /// Explicit settings win; discovered endpoints fill what is missing.
    pub fn merge(settings: Option<&OAuthSettings>, discovered: &DiscoveredOAuthMetadata) -> Self {
        let settings = settings.cloned().unwrap_or_default();
        Self {
            client_id: settings.client_id,
            client_secret: settings.client_secret,
            authorization_url: settings
                .authorization_url
                .unwrap_or_else(|| discovered.authorization_url.clone()),
            token_url: settings
                .token_url
                .unwrap_or_else(|| discovered.token_url.clone()),
            scopes: settings
                .scopes
                .unwrap_or_else(|| discovered.scopes.clone()),
            redirect_uri: settings.redirect_uri,
            registration_url: discovered.registration_url.clone(),
        }
    }
}

/// Cached OAuth tokens, keyed by server name.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// A usable access token, refreshing it when the settings allow.
    async fn get_valid_token(
        &self,
        server_name: &str,
        settings: &OAuthSettings,
    ) -> anyhow::Result<Option<String>>;

    async fn save_token(&self, server_name: &str, token: OAuthToken) -> anyhow::Result<()>;

    async fn remove_token(&self, server_name: &str) -> anyhow::Result<()>;
}

/// Authorization-server metadata lookup.
#[async_trait]
pub trait OAuthDiscovery: Send + Sync {
    /// `url` is either a protected-resource metadata document or a server base URL.
    async fn discover(&self, url: &str) -> anyhow::Result<Option<DiscoveredOAuthMetadata>>;
}

/// Interactive authentication for one server. On success the token is persisted
/// through a [`TokenStore`].
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    async fn authenticate(&self, server_name: &str, config: &OAuthClientConfig)
        -> anyhow::Result<()>;
}
