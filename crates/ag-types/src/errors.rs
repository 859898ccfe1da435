//! Error types and conversions
//!
//! One flat taxonomy for everything the flow engine can report. Protocol
//! errors carry the endpoint they came from because RFC 6749 defines two
//! distinct error tables (authorization response, §4.1.2.1, and token
//! response, §5.2) and callers react to them differently: token-endpoint
//! errors invalidate authentication state, authorization-endpoint errors
//! only terminate the current flow.

use thiserror::Error;

/// Which endpoint produced a protocol-level OAuth error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEndpoint {
    /// Error parameter on the authorization redirect (RFC 6749 §4.1.2.1).
    Authorization,

    /// Error body from the token endpoint (RFC 6749 §5.2).
    Token,
}

impl std::fmt::Display for ErrorEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorEndpoint::Authorization => write!(f, "authorization endpoint"),
            ErrorEndpoint::Token => write!(f, "token endpoint"),
        }
    }
}

/// OAuth protocol error codes.
///
/// The RFC 6749 codes plus the vendor extension codes the authorization
/// server emits (per-credential invalid/expired distinctions and
/// representative-app registration errors). Codes not in this table are
/// preserved verbatim in [`ProtocolErrorCode::Other`] and treated like any
/// other protocol error rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErrorCode {
    // RFC 6749 §4.1.2.1 and §5.2
    InvalidRequest,
    UnauthorizedClient,
    AccessDenied,
    UnsupportedResponseType,
    InvalidScope,
    ServerError,
    TemporarilyUnavailable,
    InvalidClient,
    InvalidGrant,
    UnsupportedGrantType,

    // Vendor extensions: per-credential lookup/expiry distinctions
    InvalidCode,
    ExpiredCode,
    InvalidAccessToken,
    ExpiredAccessToken,
    InvalidRefreshToken,
    ExpiredRefreshToken,
    InvalidIdToken,
    ExpiredIdToken,

    // Vendor extensions: consent and representative-app registration
    UserCancel,
    InvalidRequestUri,
    InvalidRpClient,
    InvalidRpRequestUri,
    InvalidUserData,

    /// A code this library does not know; carries the raw wire value.
    Other(String),
}

impl ProtocolErrorCode {
    /// Map a wire-format `error` value to a code.
    pub fn from_wire(code: &str) -> Self {
        match code {
            "invalid_request" => Self::InvalidRequest,
            "unauthorized_client" => Self::UnauthorizedClient,
            "access_denied" => Self::AccessDenied,
            "unsupported_response_type" => Self::UnsupportedResponseType,
            "invalid_scope" => Self::InvalidScope,
            "server_error" => Self::ServerError,
            "temporarily_unavailable" => Self::TemporarilyUnavailable,
            "invalid_client" => Self::InvalidClient,
            "invalid_grant" => Self::InvalidGrant,
            "unsupported_grant_type" => Self::UnsupportedGrantType,
            "invalid_code" => Self::InvalidCode,
            "expired_code" => Self::ExpiredCode,
            "invalid_access_token" => Self::InvalidAccessToken,
            "expired_access_token" => Self::ExpiredAccessToken,
            "invalid_refresh_token" => Self::InvalidRefreshToken,
            "expired_refresh_token" => Self::ExpiredRefreshToken,
            "invalid_id_token" => Self::InvalidIdToken,
            "expired_id_token" => Self::ExpiredIdToken,
            "user_cancel" => Self::UserCancel,
            "invalid_request_uri" => Self::InvalidRequestUri,
            "invalid_rp_client" => Self::InvalidRpClient,
            "invalid_rp_request_uri" => Self::InvalidRpRequestUri,
            "err_user_data" => Self::InvalidUserData,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire-format string for this code.
    pub fn as_wire(&self) -> &str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidCode => "invalid_code",
            Self::ExpiredCode => "expired_code",
            Self::InvalidAccessToken => "invalid_access_token",
            Self::ExpiredAccessToken => "expired_access_token",
            Self::InvalidRefreshToken => "invalid_refresh_token",
            Self::ExpiredRefreshToken => "expired_refresh_token",
            Self::InvalidIdToken => "invalid_id_token",
            Self::ExpiredIdToken => "expired_id_token",
            Self::UserCancel => "user_cancel",
            Self::InvalidRequestUri => "invalid_request_uri",
            Self::InvalidRpClient => "invalid_rp_client",
            Self::InvalidRpRequestUri => "invalid_rp_request_uri",
            Self::InvalidUserData => "err_user_data",
            Self::Other(code) => code,
        }
    }

    /// Whether a refresh failing with this code means the stored refresh
    /// token is unusable and authentication state must be cleared.
    pub fn revokes_refresh_token(&self) -> bool {
        matches!(
            self,
            Self::InvalidGrant
                | Self::InvalidClient
                | Self::InvalidRefreshToken
                | Self::ExpiredRefreshToken
        )
    }
}

impl std::fmt::Display for ProtocolErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Malformed authorization response: {0}")]
    MalformedResponse(String),

    #[error("State parameter mismatch")]
    StateMismatch,

    #[error("Authorization flow cancelled by user")]
    UserCancelled,

    #[error("Authorization flow cancelled programmatically")]
    ProgramCancelled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    #[error("JSON deserialization error: {0}")]
    JsonDeserialization(String),

    #[error("Token response construction error: {0}")]
    TokenResponseConstruction(String),

    #[error("OAuth error from {endpoint}: {code}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Protocol {
        endpoint: ErrorEndpoint,
        code: ProtocolErrorCode,
        description: Option<String>,
    },

    #[error("Invalid flow state: {0}")]
    InvalidFlowState(String),

    #[error("Not authorized")]
    NotAuthorized,
}

impl OAuthError {
    /// Shorthand for a protocol error reported on the authorization redirect.
    pub fn authorization(code: &str, description: Option<String>) -> Self {
        Self::Protocol {
            endpoint: ErrorEndpoint::Authorization,
            code: ProtocolErrorCode::from_wire(code),
            description,
        }
    }

    /// Shorthand for a protocol error reported by the token endpoint.
    pub fn token(code: &str, description: Option<String>) -> Self {
        Self::Protocol {
            endpoint: ErrorEndpoint::Token,
            code: ProtocolErrorCode::from_wire(code),
            description,
        }
    }

    /// Whether the caller may reasonably retry the failed operation.
    ///
    /// Only transport-level failures qualify; every protocol-level error is
    /// terminal for the current flow.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

pub type OAuthResult<T> = Result<T, OAuthError>;

impl From<OAuthError> for String {
    fn from(err: OAuthError) -> String {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_round_trip() {
        for code in [
            "invalid_request",
            "invalid_grant",
            "access_denied",
            "expired_refresh_token",
            "invalid_rp_client",
            "err_user_data",
        ] {
            assert_eq!(ProtocolErrorCode::from_wire(code).as_wire(), code);
        }
    }

    #[test]
    fn test_unknown_code_preserved() {
        let code = ProtocolErrorCode::from_wire("slow_down");
        assert_eq!(code, ProtocolErrorCode::Other("slow_down".to_string()));
        assert_eq!(code.as_wire(), "slow_down");
    }

    #[test]
    fn test_revoking_codes() {
        assert!(ProtocolErrorCode::InvalidGrant.revokes_refresh_token());
        assert!(ProtocolErrorCode::ExpiredRefreshToken.revokes_refresh_token());
        assert!(!ProtocolErrorCode::ServerError.revokes_refresh_token());
        assert!(!ProtocolErrorCode::Other("slow_down".into()).revokes_refresh_token());
    }

    #[test]
    fn test_error_display() {
        let err = OAuthError::token("invalid_grant", Some("revoked".to_string()));
        let msg = err.to_string();
        assert!(msg.contains("token endpoint"));
        assert!(msg.contains("invalid_grant"));
        assert!(msg.contains("revoked"));

        let err = OAuthError::Http { status: 503 };
        assert_eq!(err.to_string(), "HTTP error: status 503");
    }

    #[test]
    fn test_only_network_is_retryable() {
        assert!(OAuthError::Network("timeout".into()).is_retryable());
        assert!(!OAuthError::StateMismatch.is_retryable());
        assert!(!OAuthError::token("invalid_grant", None).is_retryable());
    }
}
