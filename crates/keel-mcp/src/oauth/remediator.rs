//! OAuth-on-401 remediation
//!
//! When a network server answers the initial connection with an authentication
//! challenge, the remediator discovers the authorization server and runs the
//! interactive flow. It never reconnects: the stored token is used by the next
//! discovery run.

use std::sync::Arc;

use keel_core::{OAuthClientConfig, OAuthDiscovery, OAuthProvider, ServerConfig};
use tracing::{debug, error, info, warn};
use url::Url;

use super::challenge::{parse_resource_metadata, AuthChallenge};

#[derive(Clone)]
pub struct OAuthRemediator {
    discovery: Arc<dyn OAuthDiscovery>,
    provider: Arc<dyn OAuthProvider>,
}

impl OAuthRemediator {
    pub fn new(discovery: Arc<dyn OAuthDiscovery>, provider: Arc<dyn OAuthProvider>) -> Self {
        Self {
            discovery,
            provider,
        }
    }

    /// Try to authenticate `server_name` after a challenge. Returns true when a
    /// token was obtained.
    pub async fn attempt(
        &self,
        server_name: &str,
        config: &ServerConfig,
        challenge: &AuthChallenge,
    ) -> bool {
        if config.oauth.as_ref().and_then(|o| o.enabled) == Some(false) {
            info!(server = %server_name, "OAuth disabled for server, not authenticating");
            return false;
        }

        let Some(discovery_url) = discovery_url(config, challenge) else {
            warn!(
                server = %server_name,
                "No URL to discover OAuth configuration from"
            );
            return false;
        };
        debug!(server = %server_name, url = %discovery_url, "Discovering OAuth configuration");

        let metadata = match self.discovery.discover(&discovery_url).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                warn!(
                    server = %server_name,
                    url = %discovery_url,
                    "Server requires authentication but no OAuth configuration was found"
                );
                return false;
            }
            Err(e) => {
                error!(
                    server = %server_name,
                    url = %discovery_url,
                    error = %e,
                    "OAuth discovery failed"
                );
                return false;
            }
        };

        let client_config = OAuthClientConfig::merge(config.oauth.as_ref(), &metadata);
        info!(
            server = %server_name,
            authorization_url = %client_config.authorization_url,
            "Starting OAuth authentication"
        );

        match self.provider.authenticate(server_name, &client_config).await {
            Ok(()) => {
                info!(server = %server_name, "OAuth authentication succeeded");
                true
            }
            Err(e) => {
                error!(
                    server = %server_name,
                    error = %e,
                    "OAuth authentication failed"
                );
                false
            }
        }
    }
}

/// The challenge's `resource_metadata` URI, else the server's origin.
pub fn discovery_url(config: &ServerConfig, challenge: &AuthChallenge) -> Option<String> {
    if let Some(url) = challenge
        .www_authenticate
        .as_deref()
        .and_then(parse_resource_metadata)
    {
        return Some(url);
    }
    let url = Url::parse(config.network_url()?).ok()?;
    base_url(&url)
}

/// `scheme://host[:port]`
pub fn base_url(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}
