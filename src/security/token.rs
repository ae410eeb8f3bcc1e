//! Bearer access tokens and the `Authorization: Token` header codec

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use rand::distributions::Alphanumeric;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of generated tokens
const GENERATED_TOKEN_LENGTH: usize = 40;

/// Header scheme used by every OCPI revision
const TOKEN_SCHEME: &str = "Token ";

/// An opaque bearer secret
///
/// Equality is constant-time and `Debug` never prints the secret.
#[derive(Clone)]
pub struct AccessToken(Arc<SecretString>);

impl AccessToken {
    /// Wrap an existing secret
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::from(token.into())))
    }

    /// Generate a fresh random token
    #[must_use]
    pub fn generate() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_TOKEN_LENGTH)
            .map(char::from)
            .collect();
        Self::new(token)
    }

    /// The raw secret
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Timing-safe comparison against a presented value
    #[must_use]
    pub fn matches(&self, presented: &str) -> bool {
        constant_time_eq(self.expose().as_bytes(), presented.as_bytes())
    }

    /// Render the `Authorization` header value
    #[must_use]
    pub fn to_header(&self, base64: bool) -> String {
        encode_header(self.expose(), base64)
    }
}

impl PartialEq for AccessToken {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other.expose())
    }
}

impl Eq for AccessToken {}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl Serialize for AccessToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for AccessToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Render `Token <value>`, base64-encoding the value when asked to
#[must_use]
pub fn encode_header(token: &str, base64: bool) -> String {
    if base64 {
        format!("{TOKEN_SCHEME}{}", STANDARD.encode(token))
    } else {
        format!("{TOKEN_SCHEME}{token}")
    }
}

/// Candidate secrets carried by an `Authorization` header value
///
/// Peers disagree on whether the value is base64-encoded, so both the raw
/// value and its decoding (when it is valid UTF-8) are returned.
#[must_use]
pub fn header_candidates(header: &str) -> Vec<String> {
    let Some(raw) = header
        .strip_prefix(TOKEN_SCHEME)
        .or_else(|| header.strip_prefix("token "))
    else {
        return Vec::new();
    };

    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    let mut candidates = vec![raw.to_string()];
    if let Some(decoded) = STANDARD
        .decode(raw)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|s| !s.is_empty() && s != raw)
    {
        candidates.push(decoded);
    }
    candidates
}

/// Compare two byte strings without early exit on the first difference
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
