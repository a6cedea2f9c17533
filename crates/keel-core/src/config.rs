//! MCP server settings
//!
//! Follows the `mcpServers` document layout used by most MCP clients:
//! transport fields (`command`/`args`/`env`, `url`, `httpUrl`) sit at the top level
//! of each server entry.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;

lazy_static! {
    static ref ENV_VAR_REGEX: Regex =
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))").unwrap();
}

/// Per-call timeout used when a server does not configure one (10 minutes).
pub const DEFAULT_MCP_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Name given to the server injected from an ad-hoc command line.
pub const EXTRA_COMMAND_SERVER_NAME: &str = "mcp";

/// Wire transport selected for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl TransportKind {
    /// Whether the transport talks to a remote HTTP endpoint.
    pub fn is_network(&self) -> bool {
        matches!(self, TransportKind::Sse | TransportKind::StreamableHttp)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Sse => write!(f, "sse"),
            TransportKind::StreamableHttp => write!(f, "streamable-http"),
        }
    }
}

/// Static OAuth client settings for a server.
///
/// Any field left unset is filled from authorization-server discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

/// Configuration for one external MCP server.
///
/// Exactly one of `command`, `url` or `http_url` is expected. When several are
/// present the network fields win (`httpUrl` first, then `url`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    // --- Stdio transport ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    // --- Network transports ---
    /// Legacy Server-Sent-Events endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Streamable HTTP endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    // --- Common ---
    /// Per-call timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub trust: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthSettings>,
}

impl ServerConfig {
    /// Stdio server spawned from `command` with `args`.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Default::default()
        }
    }

    /// Streamable HTTP server.
    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self {
            http_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Legacy SSE server.
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Transport implied by the populated fields, `None` if nothing usable is set.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        if self.http_url.is_some() {
            Some(TransportKind::StreamableHttp)
        } else if self.url.is_some() {
            Some(TransportKind::Sse)
        } else if self.command.is_some() {
            Some(TransportKind::Stdio)
        } else {
            None
        }
    }

    /// Endpoint of a network server.
    pub fn network_url(&self) -> Option<&str> {
        self.http_url.as_deref().or(self.url.as_deref())
    }

    pub fn is_network(&self) -> bool {
        self.network_url().is_some()
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_MCP_TIMEOUT)
    }

    /// One-line description safe for logs: no headers, environment or tokens.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(command) = &self.command {
            parts.push(format!("command={}", command));
        }
        if let Some(url) = self.network_url() {
            parts.push(format!("url={}", url));
        }
        if let Some(cwd) = &self.cwd {
            parts.push(format!("cwd={}", cwd.display()));
        }
        parts.push(format!("timeout={:?}", self.timeout_duration()));
        parts.push(format!("trust={}", self.trust));
        parts.join(" ")
    }
}

/// Top-level settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpSettings {
    #[serde(rename = "mcpServers", default)]
    pub servers: HashMap<String, ServerConfig>,
    /// Ad-hoc command line started as an extra stdio server named `mcp`.
    #[serde(
        rename = "mcpServerCommand",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub server_command: Option<String>,
}

impl McpSettings {
    /// Parse a settings document, expanding `$VAR` / `${VAR}` references from the
    /// process environment.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Self::from_json_str_with(json, |name| std::env::var(name).ok())
    }

    /// Parse a settings document with a custom variable lookup.
    pub fn from_json_str_with<F>(json: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut raw: serde_json::Value = serde_json::from_str(json)?;
        if let Some(servers) = raw.get_mut("mcpServers") {
            expand_value(servers, &lookup);
        }
        let mut settings: McpSettings = serde_json::from_value(raw)?;
        settings.drop_invalid_servers();
        Ok(settings)
    }

    /// Load settings from a file. A missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "Settings file not found, using empty settings");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json_str(&content)?;
        debug!(
            path = %path.display(),
            servers = settings.servers.len(),
            "Loaded MCP settings"
        );
        Ok(settings)
    }

    /// Drop entries that cannot be used. The rest of the document still loads.
    fn drop_invalid_servers(&mut self) {
        self.servers.retain(|name, config| {
            let problem = if name.trim().is_empty() {
                Some("server name is empty")
            } else if config.timeout == Some(0) {
                Some("timeout must be greater than zero")
            } else {
                None
            };
            match problem {
                Some(reason) => {
                    warn!(server = %name, reason, "Skipping invalid MCP server entry");
                    false
                }
                None => true,
            }
        });
    }
}

/// `<config dir>/keel/settings.json`
pub fn default_settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

/// `<config dir>/keel`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keel")
}

/// Replace `$VAR` and `${VAR}` in `input`. Unknown variables are left verbatim.
pub fn expand_env_vars<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_VAR_REGEX
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn expand_value<F>(value: &mut serde_json::Value, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        serde_json::Value::String(s) => {
            if s.contains('$') {
                *s = expand_env_vars(s, lookup);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                expand_value(item, lookup);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                expand_value(v, lookup);
            }
        }
        _ => {}
    }
}
