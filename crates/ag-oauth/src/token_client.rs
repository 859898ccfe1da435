//! Token endpoint client
//!
//! Code-for-token exchange, refresh, and userinfo retrieval. All requests
//! are form-encoded POSTs (userinfo excepted); all failures map into the
//! typed taxonomy so callers can tell a retryable transport error from a
//! terminal protocol error.

use std::collections::HashMap;

use ag_types::{OAuthError, OAuthResult};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::ServiceConfiguration;

/// One immutable set of issued tokens.
///
/// Superseded, never mutated: a refresh produces a new `TokenSet` and the
/// auth state manager swaps it in atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default)]
    pub token_type: String,

    /// Refresh token (optional)
    pub refresh_token: Option<String>,

    /// OIDC id token (optional)
    pub id_token: Option<String>,

    /// Granted scope (optional)
    pub scope: Option<String>,

    /// Instant the access token expires, when the server reported one
    pub expires_at: Option<DateTime<Utc>>,

    /// Instant this set was issued
    pub acquired_at: DateTime<Utc>,
}

impl TokenSet {
    /// Whether the access token is still usable at `now`, keeping `margin`
    /// of clock-skew headroom. A token without a reported expiry is treated
    /// as valid.
    pub fn valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now + margin < expires_at,
            None => true,
        }
    }
}

/// Success body from the token endpoint. Everything except `access_token`
/// is optional on the wire.
#[derive(Debug, Deserialize)]
struct TokenResponseBody {
    access_token: Option<String>,

    #[serde(default)]
    token_type: String,

    /// Expires in seconds
    expires_in: Option<i64>,

    refresh_token: Option<String>,

    id_token: Option<String>,

    scope: Option<String>,
}

/// Error body from the token endpoint (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    error_description: Option<String>,
}

/// Client for the token and userinfo endpoints.
pub struct TokenClient {
    client: Client,
}

impl TokenClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Reuse an existing `reqwest` client (connection pooling, proxies).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Arguments
    /// * `config` - Service configuration
    /// * `code` - Authorization code from the redirect
    /// * `code_verifier` - PKCE verifier issued with the request
    /// * `redirect_uri` - The redirect URI used in the authorization request
    pub async fn exchange_code(
        &self,
        config: &ServiceConfiguration,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> OAuthResult<TokenSet> {
        info!("Exchanging authorization code for tokens");

        let mut params = HashMap::new();
        params.insert("grant_type".to_string(), "authorization_code".to_string());
        params.insert("code".to_string(), code.to_string());
        params.insert("redirect_uri".to_string(), redirect_uri.to_string());
        params.insert("client_id".to_string(), config.client_id().to_string());
        params.insert("code_verifier".to_string(), code_verifier.to_string());

        // Confidential clients authenticate with their secret
        if let Some(client_secret) = config.client_secret() {
            params.insert("client_secret".to_string(), client_secret.to_string());
        }

        let tokens = self.request_tokens(config, params).await?;
        info!("Token exchange successful");
        Ok(tokens)
    }

    /// Refresh tokens using a refresh token.
    ///
    /// When the server omits a new refresh token, the one just used is
    /// carried forward so the caller never loses refresh capability.
    pub async fn refresh(
        &self,
        config: &ServiceConfiguration,
        refresh_token: &str,
    ) -> OAuthResult<TokenSet> {
        info!("Refreshing access token");

        let mut params = HashMap::new();
        params.insert("grant_type".to_string(), "refresh_token".to_string());
        params.insert("refresh_token".to_string(), refresh_token.to_string());
        params.insert("client_id".to_string(), config.client_id().to_string());

        if let Some(client_secret) = config.client_secret() {
            params.insert("client_secret".to_string(), client_secret.to_string());
        }

        let mut tokens = self.request_tokens(config, params).await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        info!("Token refresh successful");
        Ok(tokens)
    }

    /// Fetch the userinfo document with a bearer token.
    ///
    /// 401/403 mean the token is not (or no longer) accepted and map to
    /// [`OAuthError::NotAuthorized`].
    pub async fn fetch_user_info(
        &self,
        config: &ServiceConfiguration,
        access_token: &str,
    ) -> OAuthResult<serde_json::Value> {
        let endpoint = config.userinfo_endpoint().ok_or_else(|| {
            OAuthError::Configuration("no userinfo endpoint configured".to_string())
        })?;

        debug!("Fetching userinfo from {}", endpoint);

        let response = self
            .client
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| OAuthError::Network(format!("Userinfo request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(OAuthError::NotAuthorized);
        }
        if !status.is_success() {
            return Err(OAuthError::Http {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| OAuthError::Network(format!("Failed to read userinfo response: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| OAuthError::JsonDeserialization(format!("Invalid userinfo body: {}", e)))
    }

    /// POST to the token endpoint and map the response.
    async fn request_tokens(
        &self,
        config: &ServiceConfiguration,
        params: HashMap<String, String>,
    ) -> OAuthResult<TokenSet> {
        let response = self
            .client
            .post(config.token_endpoint())
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::Network(format!("Failed to send token request: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| OAuthError::Network(format!("Failed to read token response: {}", e)))?;

        if !(200..300).contains(&status) {
            let err = map_token_error(status, &body);
            error!("Token request failed with status {}: {}", status, err);
            return Err(err);
        }

        parse_token_response(&body, Utc::now())
    }
}

impl Default for TokenClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a non-2xx token endpoint response to a typed error.
///
/// HTTP 400 with a parsable RFC 6749 error body becomes a protocol error;
/// everything else surfaces as an HTTP error with its status.
fn map_token_error(status: u16, body: &str) -> OAuthError {
    if status == 400 {
        if let Ok(parsed) = serde_json::from_str::<TokenErrorBody>(body) {
            return OAuthError::token(&parsed.error, parsed.error_description);
        }
    }
    OAuthError::Http { status }
}

/// Build a [`TokenSet`] from a 2xx token endpoint body.
fn parse_token_response(body: &str, now: DateTime<Utc>) -> OAuthResult<TokenSet> {
    let parsed: TokenResponseBody = serde_json::from_str(body)
        .map_err(|e| OAuthError::JsonDeserialization(format!("Invalid token response: {}", e)))?;

    let access_token = parsed
        .access_token
        .ok_or_else(|| OAuthError::TokenResponseConstruction("missing access_token".to_string()))?;

    // expires_in is server-controlled; an absurd value must surface as a
    // typed error, not an arithmetic panic.
    let expires_at = match parsed.expires_in {
        Some(secs) => Some(
            Duration::try_seconds(secs)
                .and_then(|delta| now.checked_add_signed(delta))
                .ok_or_else(|| {
                    OAuthError::TokenResponseConstruction(format!(
                        "expires_in out of range: {}",
                        secs
                    ))
                })?,
        ),
        None => None,
    };

    Ok(TokenSet {
        access_token,
        token_type: parsed.token_type,
        refresh_token: parsed.refresh_token,
        id_token: parsed.id_token,
        scope: parsed.scope,
        expires_at,
        acquired_at: now,
    })
}
