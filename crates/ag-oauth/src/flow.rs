//! Flow session state machine
//!
//! One [`FlowSession`] drives one end-to-end authorization attempt:
//!
//! ```text
//! Idle -> RequestBuilt -> AwaitingRedirect -> Exchanging -> Completed
//!                                  |               |
//!                                  v               v
//!              Cancelled <---------+            Failed
//! ```
//!
//! A session is single-owner (`&mut self` throughout) and accepts exactly
//! one terminal redirect; every call in a terminal state fails with
//! [`OAuthError::InvalidFlowState`]. The pending PKCE verifier and expected
//! state are dropped the moment the session leaves `AwaitingRedirect`, so a
//! late or unrelated redirect can never reuse them.

use std::collections::HashMap;
use std::sync::Arc;

use ag_types::{OAuthError, OAuthResult};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth_state::AuthStateManager;
use crate::redirect::parse_redirect;
use crate::request::AuthorizationRequest;
use crate::token_client::{TokenClient, TokenSet};

/// Where a session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    RequestBuilt,
    AwaitingRedirect,
    Exchanging,
    Completed,
    Failed,
    Cancelled,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Who asked for the cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The user backed out of the authorization UI
    User,

    /// The embedding application tore the flow down
    Program,
}

/// One authorization attempt.
pub struct FlowSession {
    id: Uuid,
    auth_state: Arc<AuthStateManager>,
    token_client: Arc<TokenClient>,
    redirect_uri: String,
    extra_auth_params: HashMap<String, String>,
    state: FlowState,
    pending: Option<AuthorizationRequest>,
}

impl FlowSession {
    /// Create an idle session.
    ///
    /// # Arguments
    /// * `auth_state` - Manager that receives the completed token set
    /// * `token_client` - Client used for the code exchange
    /// * `redirect_uri` - Where the server sends the user back
    pub fn new(
        auth_state: Arc<AuthStateManager>,
        token_client: Arc<TokenClient>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            auth_state,
            token_client,
            redirect_uri: redirect_uri.into(),
            extra_auth_params: HashMap::new(),
            state: FlowState::Idle,
            pending: None,
        }
    }

    /// Additional authorization query parameters (`prompt`, `login_hint`).
    pub fn with_extra_auth_params(mut self, params: HashMap<String, String>) -> Self {
        self.extra_auth_params = params;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Build the authorization request and return the URL for the external
    /// user agent. Valid only from `Idle`.
    pub fn start(&mut self) -> OAuthResult<String> {
        if self.state != FlowState::Idle {
            return Err(OAuthError::InvalidFlowState(format!(
                "start() called in {:?}",
                self.state
            )));
        }

        let request = AuthorizationRequest::build(
            self.auth_state.config(),
            &self.redirect_uri,
            self.auth_state.config().scopes(),
            self.extra_auth_params.clone(),
        )?;
        self.state = FlowState::RequestBuilt;

        let url = request.authorization_url();
        self.pending = Some(request);
        self.state = FlowState::AwaitingRedirect;
        self.auth_state.set_flow_in_progress(true);

        info!("Flow {} awaiting authorization redirect", self.id);
        Ok(url)
    }

    /// Accept the one authorization redirect for this session and exchange
    /// its code for tokens. Valid only from `AwaitingRedirect`.
    ///
    /// On success the resulting [`TokenSet`] is installed into the auth
    /// state manager and also returned. Any failure is terminal for the
    /// session.
    pub async fn handle_redirect(&mut self, raw: &str) -> OAuthResult<TokenSet> {
        if self.state != FlowState::AwaitingRedirect {
            return Err(OAuthError::InvalidFlowState(format!(
                "handle_redirect() called in {:?}",
                self.state
            )));
        }

        // Taking the request here guarantees the verifier and expected
        // state cannot serve a second redirect.
        let request = self.pending.take().ok_or_else(|| {
            OAuthError::InvalidFlowState("no pending authorization request".to_string())
        })?;

        let response = match parse_redirect(raw, request.state()) {
            Ok(response) => response,
            Err(err) => {
                warn!("Flow {} failed parsing redirect: {}", self.id, err);
                return Err(self.fail(err));
            }
        };

        self.state = FlowState::Exchanging;
        debug!("Flow {} exchanging authorization code", self.id);

        match self
            .token_client
            .exchange_code(
                self.auth_state.config(),
                &response.code,
                &request.pkce().code_verifier,
                request.redirect_uri(),
            )
            .await
        {
            Ok(tokens) => {
                self.state = FlowState::Completed;
                self.auth_state.install(tokens.clone());
                self.auth_state.set_flow_in_progress(false);
                info!("Flow {} completed", self.id);
                Ok(tokens)
            }
            Err(err) => {
                warn!("Flow {} failed exchanging code: {}", self.id, err);
                Err(self.fail(err))
            }
        }
    }

    /// Cancel a pending session. Valid from `RequestBuilt` and
    /// `AwaitingRedirect`.
    pub fn cancel(&mut self, reason: CancelReason) -> OAuthResult<()> {
        match self.state {
            FlowState::RequestBuilt | FlowState::AwaitingRedirect => {}
            state => {
                return Err(OAuthError::InvalidFlowState(format!(
                    "cancel() called in {:?}",
                    state
                )))
            }
        }

        // Release the pending verifier and expected state
        self.pending = None;
        self.state = FlowState::Cancelled;

        let err = match reason {
            CancelReason::User => OAuthError::UserCancelled,
            CancelReason::Program => OAuthError::ProgramCancelled,
        };
        self.auth_state.record_error(err);
        self.auth_state.set_flow_in_progress(false);

        info!("Flow {} cancelled ({:?})", self.id, reason);
        Ok(())
    }

    fn fail(&mut self, err: OAuthError) -> OAuthError {
        self.state = FlowState::Failed;
        self.auth_state.record_error(err.clone());
        self.auth_state.set_flow_in_progress(false);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfiguration;

    const REDIRECT_URI: &str = "com.example.app:/oauth2redirect";

    fn session() -> FlowSession {
        // Unroutable token endpoint: exchange attempts fail fast with a
        // network error. The success path is covered by integration tests.
        let config = ServiceConfiguration::new(
            "https://auth.example.com/authorize",
            "http://127.0.0.1:1/token",
            None,
            "test_client",
            None,
            vec!["openid".to_string()],
        )
        .unwrap();
        let token_client = Arc::new(TokenClient::new());
        let auth_state = Arc::new(AuthStateManager::new(config, Arc::clone(&token_client)));
        FlowSession::new(auth_state, token_client, REDIRECT_URI)
    }

    fn extract_param(url: &str, key: &str) -> String {
        let (_, query) = url.split_once('?').unwrap();
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix(&format!("{key}=")))
            .map(|v| urlencoding::decode(v).unwrap().into_owned())
            .unwrap_or_else(|| panic!("missing {key} in {url}"))
    }

    #[test]
    fn test_start_emits_authorization_url() {
        let mut session = session();
        assert_eq!(session.state(), FlowState::Idle);

        let url = session.start().unwrap();
        assert_eq!(session.state(), FlowState::AwaitingRedirect);
        assert!(url.starts_with("https://auth.example.com/authorize?"));
        assert!(!extract_param(&url, "state").is_empty());
        assert!(!extract_param(&url, "code_challenge").is_empty());
        assert_eq!(extract_param(&url, "response_type"), "code");
        assert!(session.auth_state.current().flow_in_progress);
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut session = session();
        session.start().unwrap();
        assert!(matches!(
            session.start(),
            Err(OAuthError::InvalidFlowState(_))
        ));
    }

    #[tokio::test]
    async fn test_redirect_before_start_rejected() {
        let mut session = session();
        let result = session.handle_redirect("https://cb?code=x&state=y").await;
        assert!(matches!(result, Err(OAuthError::InvalidFlowState(_))));
    }

    #[tokio::test]
    async fn test_state_mismatch_fails_flow() {
        let mut session = session();
        session.start().unwrap();

        let raw = format!("{REDIRECT_URI}?code=abc&state=attacker-chosen");
        let err = session.handle_redirect(&raw).await.unwrap_err();
        assert_eq!(err, OAuthError::StateMismatch);
        assert_eq!(session.state(), FlowState::Failed);
        assert_eq!(
            session.auth_state.current().last_error,
            Some(OAuthError::StateMismatch)
        );
        assert!(!session.auth_state.current().flow_in_progress);
    }

    #[tokio::test]
    async fn test_second_redirect_rejected() {
        let mut session = session();
        session.start().unwrap();

        let raw = format!("{REDIRECT_URI}?code=abc&state=wrong");
        let _ = session.handle_redirect(&raw).await;

        // Terminal now; an otherwise identical redirect must not be parsed
        let result = session.handle_redirect(&raw).await;
        assert!(matches!(result, Err(OAuthError::InvalidFlowState(_))));
    }

    #[tokio::test]
    async fn test_error_redirect_fails_flow() {
        let mut session = session();
        session.start().unwrap();

        let raw = format!("{REDIRECT_URI}?error=access_denied");
        let err = session.handle_redirect(&raw).await.unwrap_err();
        assert!(matches!(err, OAuthError::Protocol { .. }));
        assert_eq!(session.state(), FlowState::Failed);
    }

    #[tokio::test]
    async fn test_exchange_failure_fails_flow() {
        let mut session = session();
        let url = session.start().unwrap();
        let state = extract_param(&url, "state");

        let raw = format!("{REDIRECT_URI}?code=abc&state={state}");
        let err = session.handle_redirect(&raw).await.unwrap_err();
        assert!(matches!(err, OAuthError::Network(_)));
        assert_eq!(session.state(), FlowState::Failed);
        assert!(!session.auth_state.is_authorized());
    }

    #[test]
    fn test_cancel_from_awaiting_redirect() {
        let mut session = session();
        session.start().unwrap();

        session.cancel(CancelReason::User).unwrap();
        assert_eq!(session.state(), FlowState::Cancelled);
        assert!(session.pending.is_none());
        assert_eq!(
            session.auth_state.current().last_error,
            Some(OAuthError::UserCancelled)
        );
    }

    #[test]
    fn test_cancel_reasons() {
        let mut session = session();
        session.start().unwrap();
        session.cancel(CancelReason::Program).unwrap();
        assert_eq!(
            session.auth_state.current().last_error,
            Some(OAuthError::ProgramCancelled)
        );
    }

    #[test]
    fn test_cancel_from_idle_rejected() {
        let mut session = session();
        assert!(matches!(
            session.cancel(CancelReason::User),
            Err(OAuthError::InvalidFlowState(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_session_rejects_everything() {
        let mut session = session();
        let url = session.start().unwrap();
        let state = extract_param(&url, "state");
        session.cancel(CancelReason::User).unwrap();

        let raw = format!("{REDIRECT_URI}?code=abc&state={state}");
        assert!(matches!(
            session.handle_redirect(&raw).await,
            Err(OAuthError::InvalidFlowState(_))
        ));
        assert!(matches!(
            session.cancel(CancelReason::User),
            Err(OAuthError::InvalidFlowState(_))
        ));
        assert!(matches!(
            session.start(),
            Err(OAuthError::InvalidFlowState(_))
        ));
    }
}
