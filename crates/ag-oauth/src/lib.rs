//! OAuth 2.0 / OpenID Connect authorization code flow engine with PKCE
//!
//! AuthGate drives the protocol side of browser-based login; the embedding
//! application owns the user agent, captures the redirect, and persists the
//! serialized state.
//!
//! # Features
//! - OAuth 2.0 Authorization Code Flow with PKCE (S256)
//! - CSRF protection with a constant-time `state` check
//! - Token exchange, refresh with coalescing, and userinfo retrieval
//! - Typed RFC 6749 error taxonomy including vendor extension codes
//! - Explicit dependency injection; no process-wide singletons
//!
//! # Usage Example
//! ```no_run
//! use std::sync::Arc;
//! use ag_oauth::{AuthStateManager, FlowSession, ServiceConfiguration, TokenClient};
//!
//! # async fn run() -> ag_types::OAuthResult<()> {
//! let config = ServiceConfiguration::from_issuer(
//!     "https://auth.example.com",
//!     "my-client-id",
//!     None,
//!     vec!["openid".to_string()],
//! )?;
//! let token_client = Arc::new(TokenClient::new());
//! let auth_state = Arc::new(AuthStateManager::new(config, Arc::clone(&token_client)));
//!
//! let mut session = FlowSession::new(
//!     Arc::clone(&auth_state),
//!     token_client,
//!     "com.example.app:/oauth2redirect",
//! );
//! let auth_url = session.start()?;
//! // Open auth_url in the system browser; when the redirect arrives:
//! // session.handle_redirect(&raw_callback_url).await?;
//! let access_token = auth_state.get_valid_access_token().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth_state;
pub mod config;
pub mod flow;
pub mod pkce;
pub mod redirect;
pub mod request;
pub mod token_client;

// Re-export public API
pub use auth_state::{AuthState, AuthStateManager, AuthStateSnapshot, EXPIRY_MARGIN_SECS};
pub use config::ServiceConfiguration;
pub use flow::{CancelReason, FlowSession, FlowState};
pub use pkce::{generate_state, PkceVerifier};
pub use redirect::{parse_redirect, AuthorizationResponse};
pub use request::AuthorizationRequest;
pub use token_client::{TokenClient, TokenSet};

pub use ag_types::{ErrorEndpoint, OAuthError, OAuthResult, ProtocolErrorCode};
