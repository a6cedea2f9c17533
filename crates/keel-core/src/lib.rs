//! # Keel Core Library
//!
//! Domain types shared by the MCP connection pipeline.
//!
//! ## Modules
//!
//! - `config` - MCP server settings and the settings document
//! - `status` - Connection status tracking and discovery state
//! - `oauth` - Token and OAuth collaborator contracts
//! - `error` - Settings errors

pub mod config;
pub mod error;
pub mod oauth;
pub mod status;

pub use config::{
    config_dir, default_settings_path, expand_env_vars, McpSettings, OAuthSettings, ServerConfig,
    TransportKind, DEFAULT_MCP_TIMEOUT, EXTRA_COMMAND_SERVER_NAME,
};
pub use error::ConfigError;
pub use oauth::{
    DiscoveredOAuthMetadata, OAuthClientConfig, OAuthDiscovery, OAuthProvider, OAuthToken,
    TokenStore,
};
pub use status::{
    ConnectionStatus, ConnectionStatusTracker, DiscoveryState, ListenerId, StatusListener,
};
