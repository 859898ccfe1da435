//! Authentication state lifecycle
//!
//! Holds the current [`TokenSet`] for one authenticated principal and hands
//! out access tokens, refreshing transparently when the cached one is about
//! to expire. Concurrent callers share a single in-flight refresh; a refresh
//! rejected by the server clears the state (the refresh token is unusable),
//! while transport failures leave the prior state in place for a later
//! caller-driven retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ag_types::{OAuthError, OAuthResult};
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ServiceConfiguration;
use crate::token_client::{TokenClient, TokenSet};

/// Clock-skew safety margin: a token within this many seconds of expiry is
/// treated as already expired.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Current authentication state for one principal.
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    /// Tokens from the last successful exchange or refresh, if any
    pub tokens: Option<TokenSet>,

    /// Last authorization or refresh error, if any
    pub last_error: Option<OAuthError>,

    /// Whether an authorization flow is currently running
    pub flow_in_progress: bool,
}

/// Serialized form of the state for the embedding application to persist.
/// Only the tokens survive a restart; errors and flow progress do not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthStateSnapshot {
    pub tokens: Option<TokenSet>,
}

/// Owns the token slot and the refresh discipline around it.
pub struct AuthStateManager {
    config: ServiceConfiguration,
    token_client: Arc<TokenClient>,
    state: RwLock<AuthState>,

    /// Serializes refreshes; held across the HTTP round trip.
    refresh_gate: tokio::sync::Mutex<()>,

    /// Completed refresh attempts. Waiters that observed an older value
    /// when they found the token expired adopt the finished attempt's
    /// outcome instead of issuing their own request.
    refresh_epoch: AtomicU64,
}

impl AuthStateManager {
    pub fn new(config: ServiceConfiguration, token_client: Arc<TokenClient>) -> Self {
        Self {
            config,
            token_client,
            state: RwLock::new(AuthState::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
            refresh_epoch: AtomicU64::new(0),
        }
    }

    /// The service configuration this manager refreshes against.
    pub fn config(&self) -> &ServiceConfiguration {
        &self.config
    }

    /// A copy of the current state.
    pub fn current(&self) -> AuthState {
        self.state.read().clone()
    }

    pub fn is_authorized(&self) -> bool {
        self.state.read().tokens.is_some()
    }

    /// Install a freshly exchanged token set, replacing any previous one.
    pub fn install(&self, tokens: TokenSet) {
        let mut state = self.state.write();
        state.tokens = Some(tokens);
        state.last_error = None;
        info!("Authentication state populated");
    }

    /// Record the terminal error of a failed flow.
    pub(crate) fn record_error(&self, error: OAuthError) {
        self.state.write().last_error = Some(error);
    }

    pub(crate) fn set_flow_in_progress(&self, in_progress: bool) {
        self.state.write().flow_in_progress = in_progress;
    }

    /// Discard all state (logout).
    pub fn clear(&self) {
        *self.state.write() = AuthState::default();
        info!("Authentication state cleared");
    }

    /// Serialized state for persistence.
    pub fn snapshot(&self) -> AuthStateSnapshot {
        AuthStateSnapshot {
            tokens: self.state.read().tokens.clone(),
        }
    }

    /// Restore state persisted by a previous process.
    pub fn restore(&self, snapshot: AuthStateSnapshot) {
        let mut state = self.state.write();
        state.tokens = snapshot.tokens;
        state.last_error = None;
        state.flow_in_progress = false;
    }

    /// Return a currently valid access token, refreshing if necessary.
    ///
    /// The cached token is returned while it is more than
    /// [`EXPIRY_MARGIN_SECS`] from expiry. Otherwise exactly one refresh is
    /// performed; callers arriving while it is in flight wait on it and
    /// receive the identical outcome. A refresh the server rejects with a
    /// refresh-token-revoking code clears the state entirely; a transport
    /// failure leaves the expired state intact.
    pub async fn get_valid_access_token(&self) -> OAuthResult<String> {
        let margin = Duration::seconds(EXPIRY_MARGIN_SECS);

        {
            let state = self.state.read();
            match &state.tokens {
                None => return Err(OAuthError::NotAuthorized),
                Some(tokens) if tokens.valid_at(Utc::now(), margin) => {
                    return Ok(tokens.access_token.clone())
                }
                Some(_) => {}
            }
        }

        let observed = self.refresh_epoch.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;

        if self.refresh_epoch.load(Ordering::Acquire) != observed {
            // Another caller finished a refresh while we waited on the
            // gate; adopt its outcome.
            let state = self.state.read();
            return match &state.tokens {
                Some(tokens) if tokens.valid_at(Utc::now(), margin) => {
                    Ok(tokens.access_token.clone())
                }
                _ => Err(state
                    .last_error
                    .clone()
                    .unwrap_or(OAuthError::NotAuthorized)),
            };
        }

        // Re-check under the gate: install() may have swapped in fresh
        // tokens between the fast path and here.
        let refresh_token = {
            let state = self.state.read();
            match &state.tokens {
                None => return Err(OAuthError::NotAuthorized),
                Some(tokens) if tokens.valid_at(Utc::now(), margin) => {
                    return Ok(tokens.access_token.clone())
                }
                Some(tokens) => tokens.refresh_token.clone(),
            }
        };

        let Some(refresh_token) = refresh_token else {
            // Expired with nothing to refresh with: reauthentication needed
            return Err(OAuthError::NotAuthorized);
        };

        let result = self.token_client.refresh(&self.config, &refresh_token).await;
        let outcome = match result {
            Ok(tokens) => {
                let access_token = tokens.access_token.clone();
                let mut state = self.state.write();
                state.tokens = Some(tokens);
                state.last_error = None;
                Ok(access_token)
            }
            Err(err) => {
                let mut state = self.state.write();
                if let OAuthError::Protocol { code, .. } = &err {
                    if code.revokes_refresh_token() {
                        warn!("Refresh token rejected ({}); clearing authentication state", code);
                        state.tokens = None;
                    }
                }
                state.last_error = Some(err.clone());
                Err(err)
            }
        };
        self.refresh_epoch.fetch_add(1, Ordering::Release);
        outcome
    }
}
