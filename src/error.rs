//! Error types for the OCPI gateway

use thiserror::Error;

use crate::client::TransportError;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the OCPI gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input supplied by the caller (identity strings, version ids, URLs)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Party not found in the registry
    #[error("party not found: {0}")]
    NotFound(String),

    /// Upsert would drop credentials roles of a party that disallows downgrades
    #[error("duplicate party: {0}")]
    DuplicateParty(String),

    /// Compare-and-swap lost against a concurrent writer
    #[error("concurrent modification of party {identity} (expected revision {expected})")]
    ConcurrentModification { identity: String, expected: u64 },

    /// Authentication/authorization error
    #[error("auth error: {0}")]
    Auth(String),

    /// Outbound transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Command dispatch error
    #[error("command error: {0}")]
    Command(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the caller may re-read and retry the operation
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cas_conflicts_are_retryable() {
        let conflict = Error::ConcurrentModification {
            identity: "DE*GEF*CPO".to_string(),
            expected: 3,
        };
        assert!(conflict.is_retryable());
        assert!(!Error::NotFound("DE*GEF*CPO".to_string()).is_retryable());
        assert!(conflict.to_string().contains("expected revision 3"));
    }
}
