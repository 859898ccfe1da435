//! Authorization request construction
//!
//! Builds the request that is handed to the external user agent: a fresh
//! CSRF `state` nonce, a fresh PKCE pair, and the rendered authorization
//! URL. One request per flow attempt; never reused.

use std::collections::HashMap;

use ag_types::{OAuthError, OAuthResult};
use reqwest::Url;

use crate::config::ServiceConfiguration;
use crate::pkce::{generate_state, PkceVerifier};

/// One authorization attempt's request parameters.
///
/// Immutable after [`AuthorizationRequest::build`]. The PKCE verifier lives
/// here until the code exchange consumes it.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    config: ServiceConfiguration,
    redirect_uri: String,
    scopes: Vec<String>,
    state: String,
    pkce: PkceVerifier,
    extra_params: HashMap<String, String>,
}

impl AuthorizationRequest {
    /// Build a request with a fresh `state` nonce and PKCE pair.
    ///
    /// # Arguments
    /// * `config` - Validated service configuration
    /// * `redirect_uri` - Where the authorization server sends the user back
    /// * `scopes` - Scopes to request; typically `config.scopes()`
    /// * `extra_params` - Additional authorization query parameters
    ///
    /// Fails with [`OAuthError::Configuration`] when the redirect URI is
    /// empty or not a parsable URI.
    pub fn build(
        config: &ServiceConfiguration,
        redirect_uri: &str,
        scopes: &[String],
        extra_params: HashMap<String, String>,
    ) -> OAuthResult<Self> {
        if redirect_uri.is_empty() {
            return Err(OAuthError::Configuration(
                "redirect_uri is empty".to_string(),
            ));
        }
        // Custom schemes (com.example.app:/callback) must parse too.
        Url::parse(redirect_uri)
            .map_err(|e| OAuthError::Configuration(format!("Invalid redirect_uri: {}", e)))?;

        Ok(Self {
            config: config.clone(),
            redirect_uri: redirect_uri.to_string(),
            scopes: scopes.to_vec(),
            state: generate_state(),
            pkce: PkceVerifier::generate(),
            extra_params,
        })
    }

    /// Render the authorization endpoint URL for the user agent.
    pub fn authorization_url(&self) -> String {
        let mut url = format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&code_challenge={}&code_challenge_method={}&state={}",
            self.config.authorization_endpoint(),
            urlencoding::encode(self.config.client_id()),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.pkce.code_challenge),
            urlencoding::encode(&self.pkce.code_challenge_method),
            urlencoding::encode(&self.state),
        );

        if !self.scopes.is_empty() {
            let scopes = self.scopes.join(" ");
            url.push_str(&format!("&scope={}", urlencoding::encode(&scopes)));
        }

        for (key, value) in &self.extra_params {
            url.push_str(&format!(
                "&{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            ));
        }

        url
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// The CSRF nonce the redirect must echo back.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// The PKCE pair owned by this attempt.
    pub fn pkce(&self) -> &PkceVerifier {
        &self.pkce
    }
}
