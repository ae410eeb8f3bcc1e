//! Version discovery and selection

use thiserror::Error;
use url::Url;

use crate::client::{CallAuth, OcpiClient};
use crate::ocpi::{LocalError, OcpiResponse, VersionDetails, VersionId, VersionInfo};

/// Why a version catalogue could not be obtained
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// No HTTP response: connect, TLS or timeout failure
    #[error("remote unreachable: {0}")]
    RemoteUnreachable(String),

    /// A response arrived but is not a usable OCPI envelope
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The counterparty answered with a non-success status
    #[error("remote status {status_code}: {message}")]
    Remote { status_code: i32, message: String },
}

impl NegotiationError {
    fn from_response<T>(response: OcpiResponse<T>) -> Self {
        match response.local_error {
            Some(LocalError::MalformedResponse(e)) => Self::MalformedResponse(e),
            Some(other) => Self::RemoteUnreachable(other.message()),
            None => Self::Remote {
                status_code: response.status_code,
                message: response.status_message.unwrap_or_default(),
            },
        }
    }
}

/// Our offered versions and theirs do not intersect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no common version")]
pub struct NoCommonVersion;

/// Fetches and compares version catalogues
#[derive(Debug, Clone)]
pub struct VersionNegotiator {
    client: OcpiClient,
}

impl VersionNegotiator {
    /// Create a negotiator
    #[must_use]
    pub const fn new(client: OcpiClient) -> Self {
        Self { client }
    }

    /// `GET` the counterparty's `/versions`
    ///
    /// # Errors
    ///
    /// Returns `RemoteUnreachable`, `MalformedResponse` or `Remote`
    pub async fn fetch_versions(
        &self,
        url: &Url,
        auth: &CallAuth,
    ) -> Result<Vec<VersionInfo>, NegotiationError> {
        let response = self.client.get_versions(url, auth).await;
        if !response.is_success() {
            return Err(NegotiationError::from_response(response));
        }
        let versions = response.data.ok_or_else(|| {
            NegotiationError::MalformedResponse("versions response carries no data".to_string())
        })?;
        tracing::debug!(url = %url, count = versions.len(), "fetched versions");
        Ok(versions)
    }

    /// `GET` the details of one version
    ///
    /// # Errors
    ///
    /// Returns `RemoteUnreachable`, `MalformedResponse` or `Remote`
    pub async fn fetch_version_details(
        &self,
        url: &Url,
        auth: &CallAuth,
    ) -> Result<VersionDetails, NegotiationError> {
        let response = self.client.get_version_details(url, auth).await;
        if !response.is_success() {
            return Err(NegotiationError::from_response(response));
        }
        let details = response.data.ok_or_else(|| {
            NegotiationError::MalformedResponse("version details carry no data".to_string())
        })?;
        tracing::debug!(url = %url, version = %details.version, endpoints = details.endpoints.len(), "fetched version details");
        Ok(details)
    }
}

/// Highest version present in both sets
///
/// # Errors
///
/// Returns `NoCommonVersion` if the sets are disjoint
pub fn select_version(ours: &[VersionId], theirs: &[VersionId]) -> Result<VersionId, NoCommonVersion> {
    ours.iter()
        .filter(|v| theirs.contains(v))
        .max()
        .cloned()
        .ok_or(NoCommonVersion)
}
