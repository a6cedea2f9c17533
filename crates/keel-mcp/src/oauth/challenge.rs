//! Authentication challenge detection
//!
//! Connect failures come from several layers (our SSE transport, rmcp's streamable
//! HTTP client, reqwest), and only some of them expose the HTTP status in a
//! structured way. Detection therefore falls back to matching the error text. The
//! text patterns are best effort.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ConnectError;

lazy_static! {
    static ref STATUS_401_REGEX: Regex = Regex::new(r"\b401\b").unwrap();
    /// `www-authenticate: <value>` as rendered by `ConnectError::HttpStatus`
    /// or by a raw header dump.
    static ref WWW_AUTHENTICATE_LINE_REGEX: Regex =
        Regex::new(r#"(?i)www-authenticate:\s*([^\r\n]+)"#).unwrap();
    /// Debug rendering of rmcp's auth error: `www_authenticate_header: "..."`.
    static ref WWW_AUTHENTICATE_DEBUG_REGEX: Regex =
        Regex::new(r#"www_authenticate_header:\s*"((?:[^"\\]|\\.)*)""#).unwrap();
    static ref RESOURCE_METADATA_REGEX: Regex =
        Regex::new(r#"resource_metadata\s*=\s*(?:"([^"]+)"|([^\s,"]+))"#).unwrap();
}

/// Phrases that mean the server wants credentials.
const AUTH_INDICATORS: &[&str] = &[
    "unauthorized",
    "auth required",
    "authrequired",
    "www-authenticate",
    "www_authenticate",
];

/// A connect failure caused by an authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Raw `WWW-Authenticate` value, when it could be recovered.
    pub www_authenticate: Option<String>,
}

impl AuthChallenge {
    /// Classify a connect failure.
    pub fn from_connect_error(err: &ConnectError) -> Option<Self> {
        match err {
            ConnectError::HttpStatus {
                status,
                www_authenticate,
                ..
            } => (*status == 401).then(|| Self {
                www_authenticate: www_authenticate.clone(),
            }),
            ConnectError::Timeout(_) | ConnectError::Spawn(_) => None,
            other => Self::from_text(&other.to_string()),
        }
    }

    /// Classify free-form failure text.
    pub fn from_text(text: &str) -> Option<Self> {
        is_auth_challenge(text).then(|| Self {
            www_authenticate: extract_www_authenticate(text),
        })
    }

    /// `resource_metadata` URI advertised in the challenge.
    pub fn resource_metadata_url(&self) -> Option<String> {
        self.www_authenticate
            .as_deref()
            .and_then(parse_resource_metadata)
    }
}

/// Whether failure text describes an HTTP 401 / authentication challenge.
pub fn is_auth_challenge(text: &str) -> bool {
    if STATUS_401_REGEX.is_match(text) {
        return true;
    }
    let lower = text.to_lowercase();
    AUTH_INDICATORS.iter().any(|needle| lower.contains(needle))
}

/// Recover a `WWW-Authenticate` value from failure text.
pub fn extract_www_authenticate(text: &str) -> Option<String> {
    if let Some(caps) = WWW_AUTHENTICATE_DEBUG_REGEX.captures(text) {
        let value = caps[1].replace("\\\"", "\"").replace("\\\\", "\\");
        return Some(value).filter(|v| !v.is_empty());
    }
    let caps = WWW_AUTHENTICATE_LINE_REGEX.captures(text)?;
    let mut value = caps[1].trim();
    // `ConnectError::HttpStatus` wraps the header in parentheses
    if let Some(stripped) = value.strip_suffix(')') {
        if value.matches('(').count() < value.matches(')').count() {
            value = stripped.trim_end();
        }
    }
    if let Some((head, _)) = value.split_once("): ") {
        value = head;
    }
    Some(value.to_string()).filter(|v| !v.is_empty())
}

/// `resource_metadata` parameter of a `WWW-Authenticate` value (RFC 9728).
pub fn parse_resource_metadata(www_authenticate: &str) -> Option<String> {
    let caps = RESOURCE_METADATA_REGEX.captures(www_authenticate)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}
