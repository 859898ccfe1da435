//! Authorization server configuration
//!
//! A [`ServiceConfiguration`] is validated once at construction and never
//! mutated afterwards. It can be built manually, derived from an issuer base
//! URL, or fetched from the issuer's OIDC discovery document.

use ag_types::{OAuthError, OAuthResult};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Validated, immutable endpoint and client configuration for one
/// authorization server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfiguration {
    authorization_endpoint: String,
    token_endpoint: String,
    userinfo_endpoint: Option<String>,
    client_id: String,
    client_secret: Option<String>,
    scopes: Vec<String>,
}

/// Subset of the OIDC discovery document this engine consumes.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    authorization_endpoint: String,
    token_endpoint: String,
    #[serde(default)]
    userinfo_endpoint: Option<String>,
}

impl ServiceConfiguration {
    /// Create a configuration from explicit endpoint URLs.
    ///
    /// Fails with [`OAuthError::Configuration`] when an endpoint is not an
    /// absolute URL or the client id is empty.
    pub fn new(
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        userinfo_endpoint: Option<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        scopes: Vec<String>,
    ) -> OAuthResult<Self> {
        let config = Self {
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            userinfo_endpoint,
            client_id: client_id.into(),
            client_secret,
            scopes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Derive a configuration from an issuer base URL using the
    /// conventional endpoint paths (`/authorize`, `/token`, `/userinfo`).
    pub fn from_issuer(
        issuer: &str,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        scopes: Vec<String>,
    ) -> OAuthResult<Self> {
        let base = issuer.trim_end_matches('/');
        Self::new(
            format!("{base}/authorize"),
            format!("{base}/token"),
            Some(format!("{base}/userinfo")),
            client_id,
            client_secret,
            scopes,
        )
    }

    /// Fetch the issuer's `/.well-known/openid-configuration` document and
    /// build a configuration from it.
    pub async fn discover(
        client: &reqwest::Client,
        issuer: &str,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        scopes: Vec<String>,
    ) -> OAuthResult<Self> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        debug!("Fetching OIDC discovery document from {}", url);

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| OAuthError::Network(format!("Discovery request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::Http {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| OAuthError::Network(format!("Failed to read discovery response: {}", e)))?;

        let doc: DiscoveryDocument = serde_json::from_str(&body).map_err(|e| {
            OAuthError::JsonDeserialization(format!("Invalid discovery document: {}", e))
        })?;

        Self::new(
            doc.authorization_endpoint,
            doc.token_endpoint,
            doc.userinfo_endpoint,
            client_id,
            client_secret,
            scopes,
        )
    }

    fn validate(&self) -> OAuthResult<()> {
        if self.client_id.is_empty() {
            return Err(OAuthError::Configuration("client_id is empty".to_string()));
        }
        for (name, endpoint) in [
            ("authorization_endpoint", Some(&self.authorization_endpoint)),
            ("token_endpoint", Some(&self.token_endpoint)),
            ("userinfo_endpoint", self.userinfo_endpoint.as_ref()),
        ] {
            if let Some(endpoint) = endpoint {
                Url::parse(endpoint).map_err(|e| {
                    OAuthError::Configuration(format!("Invalid {}: {}", name, e))
                })?;
            }
        }
        Ok(())
    }

    pub fn authorization_endpoint(&self) -> &str {
        &self.authorization_endpoint
    }

    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    pub fn userinfo_endpoint(&self) -> Option<&str> {
        self.userinfo_endpoint.as_deref()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}
