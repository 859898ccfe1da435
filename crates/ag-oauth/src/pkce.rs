//! PKCE (Proof Key for Code Exchange) utilities for OAuth 2.0
//!
//! Implements PKCE as defined in RFC 7636 with the S256 (SHA-256) challenge
//! method. The same entropy source also backs the CSRF `state` nonce.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bytes of entropy behind a code verifier. Encodes to 64 base64url
/// characters, within RFC 7636's 43-128 range.
const VERIFIER_ENTROPY_BYTES: usize = 48;

/// Bytes of entropy behind a `state` nonce (43 base64url characters).
const STATE_ENTROPY_BYTES: usize = 32;

/// PKCE pair: code verifier and its derived challenge
///
/// Created once per flow attempt and owned exclusively by that flow's
/// session. The verifier is sent only to the token endpoint; the challenge
/// goes into the authorization URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkceVerifier {
    /// Code verifier (random string, 43-128 characters)
    pub code_verifier: String,

    /// Code challenge (BASE64URL(SHA256(code_verifier)))
    pub code_challenge: String,

    /// Challenge method (always "S256")
    pub code_challenge_method: String,
}

impl PkceVerifier {
    /// Generate a fresh PKCE pair from the system CSPRNG.
    ///
    /// The verifier is 48 random bytes base64url-encoded without padding
    /// (64 characters); the challenge is the base64url-encoded SHA-256 hash
    /// of the verifier string, method "S256". No "plain" fallback exists.
    pub fn generate() -> Self {
        let mut bytes = [0u8; VERIFIER_ENTROPY_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let code_verifier = URL_SAFE_NO_PAD.encode(bytes);

        let mut hasher = Sha256::new();
        hasher.update(code_verifier.as_bytes());
        let code_challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            code_verifier,
            code_challenge,
            code_challenge_method: "S256".to_string(),
        }
    }
}

/// Generate a random `state` nonce for CSRF protection
///
/// 32 random bytes, base64url-encoded without padding (43 characters). The
/// value is stored with the pending flow and compared against the `state`
/// parameter echoed back on the authorization redirect.
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
