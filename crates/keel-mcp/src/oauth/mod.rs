//! OAuth support for network MCP servers
//!
//! - `challenge` - recognizing 401 failures and their `WWW-Authenticate` values
//! - `remediator` - discovery + authentication after a challenge
//! - `discovery` - RFC 9728 / RFC 8414 metadata lookup
//! - `provider` - browser-based authorization-code flow
//! - `token_store` - persisted tokens with refresh

mod challenge;
mod discovery;
mod flow;
mod pkce;
mod provider;
mod remediator;
mod token_store;

pub use challenge::{
    extract_www_authenticate, is_auth_challenge, parse_resource_metadata, AuthChallenge,
};
pub use discovery::{AuthorizationServerMetadata, HttpOAuthDiscovery, ProtectedResourceMetadata};
pub use flow::{
    register_client, AuthorizationCallback, AuthorizationRequest, OAuthFlow, RegisteredClient,
    TokenResponse,
};
pub use pkce::{generate_state, PkceChallenge};
pub use provider::{
    BrowserOAuthProvider, UrlOpener, CALLBACK_PATH, DEFAULT_CALLBACK_PORT, DEFAULT_OAUTH_TIMEOUT,
};
pub use remediator::{base_url, discovery_url, OAuthRemediator};
pub use token_store::{FileTokenStore, InMemoryTokenStore, TOKEN_FILE_NAME};
