use axum::http::HeaderMap;
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE},
    Engine,
};
use serde_json::{Map, Value};
use thiserror::Error;


/// Header set by the API gateway after it has verified the caller's identity.
pub const USERINFO_HEADER: &str = "x-apigateway-api-userinfo";

/// Claim holding the stable user identifier.
pub const USER_ID_CLAIM: &str = "sub";

/// Decoded identity assertion trusted from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSet {
    /// Value of the `sub` claim
    pub user_id: String,
    /// Every claim the gateway forwarded (including `sub`)
    pub claims: Map<String, Value>,
}

impl ClaimSet {
    /// Optional string claim, e.g. `email` or `name`.
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }
}

/// Claim extraction errors
#[derive(Debug, Error, PartialEq, Clone)]
pub enum ClaimError {
    /// Userinfo header not present
    #[error("Authentication information not found")]
    MissingCredential,
    /// Header is not base64-encoded JSON object
    #[error("Invalid authentication information format")]
    MalformedCredential,
    /// Decoded object has no usable `sub`
    #[error("User ID claim ('sub') not found in authentication information")]
    MissingSubjectClaim,
}

/// Turns the raw gateway header into a claim set.
///
/// Implementations must be pure: no I/O beyond the header value itself.
pub trait ClaimExtractor: Send + Sync {
    fn extract(&self, header_value: Option<&str>) -> Result<ClaimSet, ClaimError>;
}

/// Extractor for the gateway's base64 JSON userinfo header.
///
/// No signature verification happens here; the gateway is the trust boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayClaimExtractor;

impl ClaimExtractor for GatewayClaimExtractor {
    fn extract(&self, header_value: Option<&str>) -> Result<ClaimSet, ClaimError> {
        let raw = header_value.ok_or(ClaimError::MissingCredential)?;
        decode_userinfo(raw)
    }
}

/// Read the userinfo header from a request and extract claims from it.
pub fn extract_from_headers(
    extractor: &dyn ClaimExtractor,
    headers: &HeaderMap,
) -> Result<ClaimSet, ClaimError> {
    let value = match headers.get(USERINFO_HEADER) {
        Some(v) => Some(v.to_str().map_err(|_| ClaimError::MalformedCredential)?),
        None => None,
    };
    extractor.extract(value)
}

/// Decode a userinfo header value.
///
/// The gateway sometimes strips base64 padding, so `=` is appended until the
/// length is a multiple of 4 before decoding. Both the standard and the
/// URL-safe alphabet are accepted.
pub fn decode_userinfo(raw: &str) -> Result<ClaimSet, ClaimError> {
    let trimmed = raw.trim();
    let mut padded = trimmed.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let bytes = BASE64
        .decode(padded.as_bytes())
        .or_else(|_| URL_SAFE.decode(padded.as_bytes()))
        .map_err(|_| ClaimError::MalformedCredential)?;

    let claims = match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => map,
        _ => return Err(ClaimError::MalformedCredential),
    };

    let user_id = claims
        .get(USER_ID_CLAIM)
        .and_then(Value::as_str)
        .filter(|sub| !sub.is_empty())
        .ok_or(ClaimError::MissingSubjectClaim)?
        .to_string();

    Ok(ClaimSet { user_id, claims })
}
