//! Recording OAuth collaborators
//!
//! Stand-ins for [`OAuthDiscovery`] and [`OAuthProvider`] that never touch the
//! network or a browser, and remember how they were called.

use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{
    DiscoveredOAuthMetadata, OAuthClientConfig, OAuthDiscovery, OAuthProvider, OAuthToken,
    TokenStore,
};
use parking_lot::Mutex;

// ============================================================================
// MockOAuthDiscovery
// ============================================================================

#[derive(Default)]
pub struct MockOAuthDiscovery {
    metadata: Option<DiscoveredOAuthMetadata>,
    fail: bool,
    urls: Mutex<Vec<String>>,
}

impl MockOAuthDiscovery {
    /// Discovery that finds nothing.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, metadata: DiscoveredOAuthMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// URLs passed to `discover`, in call order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl OAuthDiscovery for MockOAuthDiscovery {
    async fn discover(&self, url: &str) -> anyhow::Result<Option<DiscoveredOAuthMetadata>> {
        self.urls.lock().push(url.to_string());
        if self.fail {
            anyhow::bail!("discovery unavailable");
        }
        Ok(self.metadata.clone())
    }
}

/// Metadata for an authorization server at `base`.
pub fn test_metadata(base: &str) -> DiscoveredOAuthMetadata {
    DiscoveredOAuthMetadata {
        authorization_url: format!("{}/authorize", base),
        token_url: format!("{}/token", base),
        scopes: vec!["mcp".to_string()],
        registration_url: None,
    }
}

// ============================================================================
// MockOAuthProvider
// ============================================================================

/// Succeeds by saving a fixed token, or fails when built with [`Self::failing`].
pub struct MockOAuthProvider {
    token_store: Arc<dyn TokenStore>,
    access_token: Option<String>,
    calls: Mutex<Vec<(String, OAuthClientConfig)>>,
}

impl MockOAuthProvider {
    pub fn new(token_store: Arc<dyn TokenStore>, access_token: &str) -> Self {
        Self {
            token_store,
            access_token: Some(access_token.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(token_store: Arc<dyn TokenStore>) -> Self {
        Self {
            token_store,
            access_token: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, OAuthClientConfig)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl OAuthProvider for MockOAuthProvider {
    async fn authenticate(
        &self,
        server_name: &str,
        config: &OAuthClientConfig,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .push((server_name.to_string(), config.clone()));
        let Some(access_token) = &self.access_token else {
            anyhow::bail!("user denied access");
        };
        self.token_store
            .save_token(server_name, OAuthToken::bearer(access_token.clone()))
            .await
    }
}
