//! Time-based access tokens
//!
//! Instead of a static secret, both sides share a seed and derive the token
//! for the current time bucket: `hex(HMAC-SHA256(seed, bucket_be)[..20])`.
//! Verification accepts the current bucket and one bucket either side.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::token::{AccessToken, constant_time_eq};

/// Number of MAC bytes kept in the derived token
const TOKEN_BYTES: usize = 20;

/// Accepted clock skew in buckets
const SKEW_BUCKETS: i64 = 1;

/// Seed and validity window for TOTP-derived tokens
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpConfig {
    pub seed: String,
    /// Bucket length in seconds
    pub validity_secs: u64,
}

impl std::fmt::Debug for TotpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotpConfig")
            .field("seed", &"***")
            .field("validity_secs", &self.validity_secs)
            .finish()
    }
}

impl TotpConfig {
    /// Create a configuration
    #[must_use]
    pub fn new(seed: impl Into<String>, validity: Duration) -> Self {
        Self {
            seed: seed.into(),
            validity_secs: validity.as_secs().max(1),
        }
    }

    /// Time bucket containing `at`
    #[must_use]
    pub fn bucket(&self, at: DateTime<Utc>) -> i64 {
        #[allow(clippy::cast_possible_wrap)]
        let validity = self.validity_secs.max(1) as i64;
        at.timestamp().div_euclid(validity)
    }

    /// Token for a given bucket
    #[must_use]
    pub fn token_for_bucket(&self, bucket: i64) -> String {
        let Ok(mut mac) = <Hmac<Sha256> as Mac>::new_from_slice(self.seed.as_bytes()) else {
            // HMAC accepts keys of any length
            return String::new();
        };
        mac.update(&bucket.to_be_bytes());
        let digest = mac.finalize().into_bytes();
        hex::encode(&digest[..TOKEN_BYTES])
    }

    /// Token valid at `at`
    #[must_use]
    pub fn token_at(&self, at: DateTime<Utc>) -> AccessToken {
        AccessToken::new(self.token_for_bucket(self.bucket(at)))
    }

    /// Whether `presented` matches the bucket of `at` or an adjacent one
    #[must_use]
    pub fn verify(&self, presented: &str, at: DateTime<Utc>) -> bool {
        let current = self.bucket(at);
        (-SKEW_BUCKETS..=SKEW_BUCKETS).any(|offset| {
            let expected = self.token_for_bucket(current + offset);
            constant_time_eq(expected.as_bytes(), presented.as_bytes())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn config() -> TotpConfig {
        TotpConfig::new("shared-seed", Duration::from_secs(30))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn same_bucket_same_token() {
        let totp = config();
        assert_eq!(totp.token_at(at(60)), totp.token_at(at(89)));
        assert_ne!(totp.token_at(at(60)), totp.token_at(at(90)));
        assert_eq!(totp.token_at(at(60)).expose().len(), TOKEN_BYTES * 2);
    }

    #[test]
    fn accepts_one_bucket_of_skew() {
        let totp = config();
        let token = totp.token_at(at(300));
        assert!(totp.verify(token.expose(), at(300)));
        assert!(totp.verify(token.expose(), at(329)));
        assert!(totp.verify(token.expose(), at(359)));
        assert!(totp.verify(token.expose(), at(271)));
        assert!(!totp.verify(token.expose(), at(360)));
        assert!(!totp.verify(token.expose(), at(269)));
    }

    #[test]
    fn different_seeds_disagree() {
        let a = config();
        let b = TotpConfig::new("other-seed", Duration::from_secs(30));
        assert!(!b.verify(a.token_at(at(0)).expose(), at(0)));
    }
}
