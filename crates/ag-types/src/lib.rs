//! Shared error types for AuthGate

pub mod errors;

pub use errors::{ErrorEndpoint, OAuthError, OAuthResult, ProtocolErrorCode};
