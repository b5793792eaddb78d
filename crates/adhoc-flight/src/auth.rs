//! Flight header authentication
//!
//! Flight's header-based scheme sends `authorization: Basic <base64>` on the
//! handshake and expects `authorization: Bearer <token>` back. The token is
//! then sent on every following call. Personal access tokens skip the
//! handshake and are sent as bearer tokens directly.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tonic::metadata::MetadataMap;

/// Metadata key carrying credentials in both directions
pub const AUTHORIZATION: &str = "authorization";

const BASIC_PREFIX: &str = "Basic ";
const BEARER_PREFIX: &str = "Bearer ";

/// `Basic` header value for a username/password pair
pub fn basic_authorization(username: &str, password: &str) -> String {
    let encoded = STANDARD.encode(format!("{}:{}", username, password));
    format!("{}{}", BASIC_PREFIX, encoded)
}

/// `Bearer` header value for a token
pub fn bearer_authorization(token: &str) -> String {
    format!("{}{}", BEARER_PREFIX, token)
}

/// Extract the bearer token from `authorization` metadata, if any
pub fn extract_bearer(metadata: &MetadataMap) -> Option<String> {
    metadata
        .get_all(AUTHORIZATION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| value.strip_prefix(BEARER_PREFIX))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Decode a `Basic` header value into `(username, password)`
pub fn parse_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix(BASIC_PREFIX)?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
