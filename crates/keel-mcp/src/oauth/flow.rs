//! OAuth 2.1 authorization-code flow with PKCE
//!
//! Builds the authorization URL, exchanges codes and refresh tokens at the token
//! endpoint, and registers public clients dynamically (RFC 7591).

use std::collections::HashMap;

use chrono::{Duration, Utc};
use keel_core::OAuthToken;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::pkce::{generate_state, PkceChallenge};

/// Client name sent during dynamic registration.
pub const CLIENT_NAME: &str = "Keel";

/// Authorization request to be opened in the browser.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub authorization_url: String,
    pub state: String,
    pub pkce_verifier: String,
}

/// Query parameters of the authorization redirect.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthorizationCallback {
    /// Missing when authorization failed.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl AuthorizationCallback {
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| match &self.error_description {
            Some(desc) => format!("{}: {}", e, desc),
            None => e.clone(),
        })
    }
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl From<TokenResponse> for OAuthToken {
    fn from(response: TokenResponse) -> Self {
        Self {
            expires_at: response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            refresh_token: response.refresh_token,
            scope: response.scope,
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Bearer".to_string()),
            access_token: response.access_token,
        }
    }
}

#[derive(Debug, Serialize)]
struct RegistrationRequest<'a> {
    client_name: &'a str,
    redirect_uris: Vec<&'a str>,
    grant_types: Vec<&'a str>,
    response_types: Vec<&'a str>,
    token_endpoint_auth_method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

/// Credentials issued by dynamic client registration.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredClient {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Token endpoint operations for one client.
#[derive(Debug, Clone)]
pub struct OAuthFlow {
    authorization_url: String,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl OAuthFlow {
    pub fn new(
        authorization_url: impl Into<String>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            authorization_url: authorization_url.into(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
        }
    }

    pub fn create_authorization_request(
        &self,
        redirect_uri: &str,
        scopes: &[String],
    ) -> anyhow::Result<AuthorizationRequest> {
        let state = generate_state();
        let pkce = PkceChallenge::generate();

        let mut url = Url::parse(&self.authorization_url)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.client_id);
            query.append_pair("redirect_uri", redirect_uri);
            if !scopes.is_empty() {
                query.append_pair("scope", &scopes.join(" "));
            }
            query.append_pair("state", &state);
            query.append_pair("code_challenge", &pkce.challenge);
            query.append_pair("code_challenge_method", pkce.method());
        }
        debug!(url = %url, "Created authorization URL");

        Ok(AuthorizationRequest {
            authorization_url: url.to_string(),
            state,
            pkce_verifier: pkce.verifier,
        })
    }

    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        code: &str,
        redirect_uri: &str,
        pkce_verifier: &str,
    ) -> anyhow::Result<OAuthToken> {
        info!("Exchanging authorization code for tokens");

        let mut params = self.client_params();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", redirect_uri);
        params.insert("code_verifier", pkce_verifier);

        let response = http.post(&self.token_url).form(&params).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Token exchange failed: HTTP {} - {}", status, body);
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.into())
    }

    /// Refresh an access token. A response without a new refresh token keeps the
    /// old one.
    pub async fn refresh_token(
        &self,
        http: &reqwest::Client,
        refresh_token: &str,
    ) -> anyhow::Result<OAuthToken> {
        info!("Refreshing access token");

        let mut params = self.client_params();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);

        let response = http.post(&self.token_url).form(&params).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Token refresh failed: HTTP {} - {}", status, body);
        }

        let mut token: OAuthToken = response.json::<TokenResponse>().await?.into();
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }

    fn client_params(&self) -> HashMap<&'static str, &str> {
        let mut params = HashMap::new();
        params.insert("client_id", self.client_id.as_str());
        if let Some(secret) = &self.client_secret {
            params.insert("client_secret", secret.as_str());
        }
        params
    }
}

/// Register a public client at `registration_url`.
pub async fn register_client(
    http: &reqwest::Client,
    registration_url: &str,
    redirect_uri: &str,
    scopes: &[String],
) -> anyhow::Result<RegisteredClient> {
    info!(url = %registration_url, "Registering OAuth client");

    let request = RegistrationRequest {
        client_name: CLIENT_NAME,
        redirect_uris: vec![redirect_uri],
        grant_types: vec!["authorization_code", "refresh_token"],
        response_types: vec!["code"],
        token_endpoint_auth_method: "none",
        scope: (!scopes.is_empty()).then(|| scopes.join(" ")),
    };

    let response = http.post(registration_url).json(&request).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Client registration failed: HTTP {} - {}", status, body);
    }

    let client: RegisteredClient = response.json().await?;
    debug!(client_id = %client.client_id, "OAuth client registered");
    Ok(client)
}
