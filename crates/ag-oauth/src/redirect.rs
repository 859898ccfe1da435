//! Authorization redirect parsing
//!
//! Turns the raw callback the embedding application captured (full URL with
//! query or fragment parameters, or a bare query/POST body) into either an
//! [`AuthorizationResponse`] or a typed error. State validation happens here
//! and is the CSRF defense for the whole flow; it is never skipped.

use std::collections::HashMap;

use ag_types::{OAuthError, OAuthResult};
use subtle::ConstantTimeEq;
use tracing::warn;

/// Successful authorization redirect: the code to exchange plus whatever
/// else the server echoed. Consumed immediately by the token exchange.
#[derive(Debug, Clone)]
pub struct AuthorizationResponse {
    /// Authorization code to exchange at the token endpoint
    pub code: String,

    /// Echoed `state` parameter (already validated against the expected one)
    pub state: String,

    /// Remaining parameters reported by the server (`iss`, vendor extras)
    pub extra: HashMap<String, String>,
}

/// Parse a raw authorization callback and validate its `state`.
///
/// # Arguments
/// * `raw` - Full redirect URL (custom schemes included) or bare parameter
///   string
/// * `expected_state` - The `state` issued with the authorization request
///
/// An `error` parameter maps through the RFC 6749 §4.1.2.1 table (unknown
/// codes are carried as-is, not rejected). A missing `code` is
/// [`OAuthError::MalformedResponse`]. A `state` that does not match exactly
/// is [`OAuthError::StateMismatch`], compared in constant time; an absent
/// `state` is a mismatch too.
pub fn parse_redirect(raw: &str, expected_state: &str) -> OAuthResult<AuthorizationResponse> {
    let mut params = parse_params(raw);

    if let Some(code) = params.remove("error") {
        let description = params.remove("error_description");
        warn!("Authorization redirect carried error: {}", code);
        return Err(OAuthError::authorization(&code, description));
    }

    // An absent state cannot match the expected one; it gets the same
    // treatment as a wrong state, not a parse error.
    let state = params.remove("state").unwrap_or_default();

    if !bool::from(state.as_bytes().ct_eq(expected_state.as_bytes())) {
        warn!("Authorization redirect state does not match the issued state");
        return Err(OAuthError::StateMismatch);
    }

    let code = params
        .remove("code")
        .ok_or_else(|| OAuthError::MalformedResponse("missing code parameter".to_string()))?;

    Ok(AuthorizationResponse {
        code,
        state,
        extra: params,
    })
}

/// Extract the parameter section of a raw callback and decode it.
///
/// Prefers query parameters; falls back to the fragment when the query
/// carries neither `code` nor `error` (some servers return fragment-encoded
/// responses). A string with no `?` or `#` is treated as a bare parameter
/// body.
fn parse_params(raw: &str) -> HashMap<String, String> {
    let query = raw.split_once('?').map(|(_, rest)| rest);
    let section = match query {
        Some(q) => {
            let q = q.split_once('#').map(|(q, _)| q).unwrap_or(q);
            let parsed = decode_pairs(q);
            if parsed.contains_key("code") || parsed.contains_key("error") {
                return parsed;
            }
            match raw.split_once('#') {
                Some((_, fragment)) => fragment,
                None => return parsed,
            }
        }
        None => match raw.split_once('#') {
            Some((_, fragment)) => fragment,
            None => raw,
        },
    };
    decode_pairs(section)
}

fn decode_pairs(section: &str) -> HashMap<String, String> {
    section
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((decode_component(key)?, decode_component(value)?))
        })
        .collect()
}

fn decode_component(component: &str) -> Option<String> {
    // Form-encoding sends spaces as '+'
    urlencoding::decode(&component.replace('+', " "))
        .ok()
        .map(|c| c.into_owned())
}
