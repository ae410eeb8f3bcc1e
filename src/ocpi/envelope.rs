//! The OCPI response envelope
//!
//! Every OCPI response wraps its payload in `{status_code, status_message,
//! timestamp, data}`. Failures that never reached the counterparty (no URL,
//! no common version, transport errors) use the same envelope with
//! `status_code = -1` and no HTTP response attached, so callers branch on one
//! type for both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::version::VersionId;

/// OCPI status codes
pub mod status {
    /// Local (non-network) failure, never sent on the wire
    pub const LOCAL_ERROR: i32 = -1;
    pub const SUCCESS: i32 = 1000;
    pub const GENERIC_CLIENT_ERROR: i32 = 2000;
    pub const INVALID_PARAMETERS: i32 = 2001;
    pub const NOT_ENOUGH_INFORMATION: i32 = 2002;
    pub const UNKNOWN_LOCATION: i32 = 2003;
    pub const UNKNOWN_TOKEN: i32 = 2004;
    pub const GENERIC_SERVER_ERROR: i32 = 3000;
    pub const UNABLE_TO_USE_CLIENT_API: i32 = 3001;
    pub const UNSUPPORTED_VERSION: i32 = 3002;
    pub const NO_MATCHING_ENDPOINTS: i32 = 3003;
}

/// Failures detected before or instead of a protocol response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalError {
    /// No versions URL configured or the counterparty could not be reached
    NoRemoteUrl,
    /// The party's status forbids protocol traffic
    PartyDisabled,
    /// Our offered versions and theirs do not intersect
    NoCommonVersion,
    /// The handshake would lower the selected version
    DowngradeRejected {
        current: VersionId,
        proposed: VersionId,
    },
    /// A version id that the counterparty does not advertise or we do not speak
    UnknownVersion(String),
    /// The version details carry no endpoint for the required module
    NoEndpoint(String),
    /// The party is not in the registry
    UnknownParty(String),
    /// The party has no active registration
    NotRegistered,
    /// Lost a compare-and-swap against a concurrent registration
    ConcurrentModification,
    /// Connect, TLS handshake or timeout failure
    Transport(String),
    /// The counterparty answered with something that is not an OCPI envelope
    MalformedResponse(String),
    /// Party store failure
    Store(String),
}

impl LocalError {
    /// Human-readable status message placed in the envelope
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::NoRemoteUrl => "No remote URL available!".to_string(),
            Self::PartyDisabled => "Party is disabled!".to_string(),
            Self::NoCommonVersion => "No common version available!".to_string(),
            Self::DowngradeRejected { current, proposed } => {
                format!("Downgrade from version {current} to {proposed} rejected!")
            }
            Self::UnknownVersion(v) => format!("Unknown version identification '{v}'!"),
            Self::NoEndpoint(module) => format!("No '{module}' endpoint available!"),
            Self::UnknownParty(party) => format!("Unknown party '{party}'!"),
            Self::NotRegistered => "Party is not registered!".to_string(),
            Self::ConcurrentModification => {
                "Party was modified concurrently, re-read and retry!".to_string()
            }
            Self::Transport(e) => format!("Transport failure: {e}"),
            Self::MalformedResponse(e) => format!("Malformed response: {e}"),
            Self::Store(e) => format!("Party store failure: {e}"),
        }
    }

    /// Whether re-invoking the operation may succeed without other changes
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification)
    }
}

/// Metadata of the HTTP response an envelope arrived in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMeta {
    pub status: u16,
    /// `X-Request-ID` echoed by the counterparty
    pub request_id: Option<String>,
    /// `X-Correlation-ID` echoed by the counterparty
    pub correlation_id: Option<String>,
}

/// An OCPI response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct OcpiResponse<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub status_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Present only when the envelope came over HTTP
    #[serde(skip)]
    pub http: Option<HttpMeta>,
    /// Present only for `status_code = -1`
    #[serde(skip)]
    pub local_error: Option<LocalError>,
}

impl<T> OcpiResponse<T> {
    /// A successful envelope carrying `data`
    #[must_use]
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            status_code: status::SUCCESS,
            status_message: Some("Success".to_string()),
            timestamp: Utc::now(),
            http: None,
            local_error: None,
        }
    }

    /// A protocol error envelope
    #[must_use]
    pub fn error(status_code: i32, message: impl Into<String>) -> Self {
        Self {
            data: None,
            status_code,
            status_message: Some(message.into()),
            timestamp: Utc::now(),
            http: None,
            local_error: None,
        }
    }

    /// A local failure that never produced an HTTP response
    #[must_use]
    pub fn local(error: LocalError) -> Self {
        Self {
            data: None,
            status_code: status::LOCAL_ERROR,
            status_message: Some(error.message()),
            timestamp: Utc::now(),
            http: None,
            local_error: Some(error),
        }
    }

    /// Whether the counterparty reported success
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status_code == status::SUCCESS
    }

    /// Whether this envelope describes a local failure
    #[must_use]
    pub const fn is_local_error(&self) -> bool {
        self.status_code == status::LOCAL_ERROR
    }

    /// Attach HTTP metadata
    #[must_use]
    pub fn with_http(mut self, http: HttpMeta) -> Self {
        self.http = Some(http);
        self
    }

    /// Map the payload, keeping status and metadata
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OcpiResponse<U> {
        OcpiResponse {
            data: self.data.map(f),
            status_code: self.status_code,
            status_message: self.status_message,
            timestamp: self.timestamp,
            http: self.http,
            local_error: self.local_error,
        }
    }

    /// Re-type a failed envelope, dropping its payload
    #[must_use]
    pub fn cast<U>(self) -> OcpiResponse<U> {
        OcpiResponse {
            data: None,
            status_code: self.status_code,
            status_message: self.status_message,
            timestamp: self.timestamp,
            http: self.http,
            local_error: self.local_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_errors_carry_no_http_response() {
        let resp: OcpiResponse<()> = OcpiResponse::local(LocalError::NoRemoteUrl);
        assert_eq!(resp.status_code, -1);
        assert_eq!(resp.status_message.as_deref(), Some("No remote URL available!"));
        assert!(resp.http.is_none());
        assert!(resp.is_local_error());
    }

    #[test]
    fn parses_envelope_without_timestamp_or_data() {
        let json = r#"{"status_code": 2001, "status_message": "Invalid parameters"}"#;
        let resp: OcpiResponse<serde_json::Value> = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status_code, status::INVALID_PARAMETERS);
        assert!(resp.data.is_none());
        assert!(resp.local_error.is_none());
        assert!(!resp.is_success());
    }

    #[test]
    fn serialized_envelope_omits_local_metadata() {
        let resp = OcpiResponse::success(vec![1, 2]);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status_code"], 1000);
        assert_eq!(json["data"], serde_json::json!([1, 2]));
        assert!(json.get("http").is_none());
        assert!(json.get("local_error").is_none());
    }

    #[test]
    fn downgrade_message_names_both_versions() {
        let err = LocalError::DowngradeRejected {
            current: VersionId::parse("2.2.1").unwrap(),
            proposed: VersionId::parse("2.1.1").unwrap(),
        };
        assert_eq!(err.message(), "Downgrade from version 2.2.1 to 2.1.1 rejected!");
        assert!(!err.is_retryable());
        assert!(LocalError::ConcurrentModification.is_retryable());
    }
}
