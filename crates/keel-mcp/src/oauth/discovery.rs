//! OAuth metadata discovery over well-known documents
//!
//! Lookup order:
//!
//! 1. Protected-resource metadata (RFC 9728), either the URL given or
//!    `<origin>/.well-known/oauth-protected-resource`
//! 2. For its first authorization server: `oauth-authorization-server` (RFC 8414),
//!    then `openid-configuration`
//! 3. Without a protected-resource document, the same two documents at the origin

use async_trait::async_trait;
use keel_core::{DiscoveredOAuthMetadata, OAuthDiscovery};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::remediator::base_url;

const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";
const AUTHORIZATION_SERVER_PATH: &str = "/.well-known/oauth-authorization-server";
const OPENID_CONFIGURATION_PATH: &str = "/.well-known/openid-configuration";

/// RFC 9728 protected-resource metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtectedResourceMetadata {
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

/// RFC 8414 / OIDC authorization-server metadata (the fields we use).
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationServerMetadata {
    #[serde(default)]
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

/// [`OAuthDiscovery`] over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpOAuthDiscovery {
    http: reqwest::Client,
}

impl HttpOAuthDiscovery {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn protected_resource(
        &self,
        url: &Url,
    ) -> anyhow::Result<Option<ProtectedResourceMetadata>> {
        let document = if url.path().starts_with(PROTECTED_RESOURCE_PATH) {
            url.to_string()
        } else {
            match base_url(url) {
                Some(origin) => format!("{}{}", origin, PROTECTED_RESOURCE_PATH),
                None => return Ok(None),
            }
        };
        self.fetch_json(&document).await
    }

    async fn authorization_server(
        &self,
        issuer: &str,
    ) -> anyhow::Result<Option<AuthorizationServerMetadata>> {
        let issuer = issuer.trim_end_matches('/');
        for suffix in [AUTHORIZATION_SERVER_PATH, OPENID_CONFIGURATION_PATH] {
            let document = format!("{}{}", issuer, suffix);
            if let Some(metadata) = self.fetch_json(&document).await? {
                info!(url = %document, "Found authorization server metadata");
                return Ok(Some(metadata));
            }
        }
        Ok(None)
    }

    /// `Ok(None)` for non-success statuses and undecodable bodies; network
    /// failures are errors.
    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> anyhow::Result<Option<T>> {
        debug!(url = %url, "Fetching OAuth metadata");
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            debug!(url = %url, status = %response.status(), "Metadata document not available");
            return Ok(None);
        }

        match response.json::<T>().await {
            Ok(document) => Ok(Some(document)),
            Err(e) => {
                debug!(url = %url, error = %e, "Ignoring malformed metadata document");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl OAuthDiscovery for HttpOAuthDiscovery {
    async fn discover(&self, url: &str) -> anyhow::Result<Option<DiscoveredOAuthMetadata>> {
        let url = Url::parse(url)?;

        let resource = self.protected_resource(&url).await?;
        let issuer = match resource
            .as_ref()
            .and_then(|r| r.authorization_servers.first())
        {
            Some(issuer) => issuer.clone(),
            None => match base_url(&url) {
                Some(origin) => origin,
                None => return Ok(None),
            },
        };

        let Some(server) = self.authorization_server(&issuer).await? else {
            return Ok(None);
        };

        let resource_scopes = resource.map(|r| r.scopes_supported).unwrap_or_default();
        let scopes = if resource_scopes.is_empty() {
            server.scopes_supported
        } else {
            resource_scopes
        };

        Ok(Some(DiscoveredOAuthMetadata {
            authorization_url: server.authorization_endpoint,
            token_url: server.token_endpoint,
            scopes,
            registration_url: server.registration_endpoint,
        }))
    }
}
