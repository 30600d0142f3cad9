//! Unverified JWT claims decoding
//!
//! Tokens handled here come straight from a completed OAuth exchange, so
//! the payload is read without any signature, issuer or expiry checks.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{Map, Value};

use crate::error::ClaimsError;

/// Decoded JWT payload
pub type Claims = Map<String, Value>;

/// Username shown when a token carries no usable username claim
pub const UNKNOWN_USERNAME: &str = "user@unknown";

const USERNAME_CLAIMS: [&str; 3] = ["upn", "unique_name", "email"];

/// Decode the payload segment of a compact JWT
pub fn decode_claims(token: &str) -> Result<Claims, ClaimsError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(ClaimsError::MalformedToken(segments.len()));
    }

    // Tolerate padded payloads
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| ClaimsError::DecodeError(e.to_string()))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ClaimsError::DecodeError(
            "token payload is not a JSON object".to_string(),
        )),
        Err(e) => Err(ClaimsError::DecodeError(e.to_string())),
    }
}

/// User object id (`oid`)
pub fn object_id(claims: &Claims) -> Result<String, ClaimsError> {
    string_claim(claims, "oid").ok_or_else(|| ClaimsError::ClaimNotFound("oid".to_string()))
}

/// Username from `upn`, then `unique_name`, then `email`
pub fn username(claims: &Claims) -> Result<String, ClaimsError> {
    USERNAME_CLAIMS
        .iter()
        .find_map(|name| string_claim(claims, name))
        .ok_or_else(|| ClaimsError::ClaimNotFound(USERNAME_CLAIMS.join("|")))
}

/// Display username for a token, falling back to [`UNKNOWN_USERNAME`]
pub fn display_username(token: &str) -> String {
    decode_claims(token)
        .and_then(|claims| username(&claims))
        .unwrap_or_else(|_| UNKNOWN_USERNAME.to_string())
}

fn string_claim(claims: &Claims, name: &str) -> Option<String> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
