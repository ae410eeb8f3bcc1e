//! Receiver side of the credentials handshake
//!
//! The reply is persisted before it is returned. If the response then fails
//! to reach the initiator, the initiator keeps its old token pair and a
//! re-registration (PUT) brings both sides back in line.

use axum::http::StatusCode;
use serde_json::Value;

use super::RegistrationProtocol;
use super::initiator::clear_registration;
use crate::Error;
use crate::client::CallAuth;
use crate::ocpi::{
    Credentials, InterfaceRole, ModuleId, OcpiResponse, VersionDescriptor, VersionId, descriptor,
    status,
};
use crate::parties::RemoteAccessStatus;
use crate::security::{AccessToken, AuthenticatedParty};

/// HTTP status plus OCPI envelope for a credentials request
#[derive(Debug)]
pub struct ReceiverReply {
    pub status: StatusCode,
    pub body: OcpiResponse<Value>,
}

impl ReceiverReply {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: OcpiResponse::success(body),
        }
    }

    fn error(status: StatusCode, status_code: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            body: OcpiResponse::error(status_code, message),
        }
    }

    fn method_not_allowed(message: &str) -> Self {
        Self::error(
            StatusCode::METHOD_NOT_ALLOWED,
            status::GENERIC_CLIENT_ERROR,
            message,
        )
    }
}

impl RegistrationProtocol {
    /// `GET /{version}/credentials`: our credentials with the caller's token
    #[must_use]
    pub fn handle_get(&self, caller: &AuthenticatedParty, version: &str) -> ReceiverReply {
        let descriptor = match self.offered_descriptor(version) {
            Ok(descriptor) => descriptor,
            Err(reply) => return reply,
        };
        let ours = self.node.credentials(&caller.token);
        ReceiverReply::ok(ours.to_wire(descriptor.credentials_shape))
    }

    /// `POST /{version}/credentials`: first registration
    pub async fn handle_post(
        &self,
        caller: &AuthenticatedParty,
        version: &str,
        body: Value,
    ) -> ReceiverReply {
        if caller.party.is_registered() {
            tracing::warn!(party = %caller.party.identity, "POST credentials from a registered party");
            return ReceiverReply::method_not_allowed(
                "Party is already registered, use PUT to update the credentials",
            );
        }
        self.accept_credentials(caller, version, body).await
    }

    /// `PUT /{version}/credentials`: re-registration
    pub async fn handle_put(
        &self,
        caller: &AuthenticatedParty,
        version: &str,
        body: Value,
    ) -> ReceiverReply {
        if !caller.party.is_registered() {
            tracing::warn!(party = %caller.party.identity, "PUT credentials from an unregistered party");
            return ReceiverReply::method_not_allowed(
                "Party is not registered, use POST to register",
            );
        }
        self.accept_credentials(caller, version, body).await
    }

    /// `DELETE /{version}/credentials`: the caller ends the partnership
    #[must_use]
    pub fn handle_delete(&self, caller: &AuthenticatedParty, version: &str) -> ReceiverReply {
        if !caller.party.is_registered() {
            return ReceiverReply::method_not_allowed("Party is not registered");
        }
        if let Err(reply) = self.offered_descriptor(version) {
            return reply;
        }

        let identity = &caller.party.identity;
        match self
            .registry
            .update(identity, caller.party.revision, clear_registration)
        {
            Ok(_) => {
                tracing::info!(party = %identity, "party unregistered itself");
                ReceiverReply::ok(Value::Null)
            }
            Err(e) => store_failure(&e),
        }
    }

    fn offered_descriptor(&self, version: &str) -> Result<&'static VersionDescriptor, ReceiverReply> {
        VersionId::parse(version)
            .ok()
            .filter(|v| self.node.offers(v))
            .and_then(|v| descriptor(&v))
            .ok_or_else(|| {
                ReceiverReply::error(
                    StatusCode::OK,
                    status::UNSUPPORTED_VERSION,
                    format!("Unsupported version '{version}'"),
                )
            })
    }

    async fn accept_credentials(
        &self,
        caller: &AuthenticatedParty,
        version: &str,
        body: Value,
    ) -> ReceiverReply {
        let party = &caller.party;
        let descriptor = match self.offered_descriptor(version) {
            Ok(descriptor) => descriptor,
            Err(reply) => return reply,
        };
        let version = descriptor.version_id();

        if let Some(current) = &party.selected_version
            && version < *current
            && !party.allow_downgrades
        {
            tracing::warn!(party = %party.identity, %current, proposed = %version, "downgrade rejected");
            return ReceiverReply::error(
                StatusCode::OK,
                status::UNSUPPORTED_VERSION,
                format!("Downgrade from version {current} to {version} rejected!"),
            );
        }

        let theirs = match Credentials::from_wire(body, party.identity.role) {
            Ok(theirs) => theirs,
            Err(e) => {
                return ReceiverReply::error(
                    StatusCode::BAD_REQUEST,
                    status::INVALID_PARAMETERS,
                    e.to_string(),
                );
            }
        };

        // Prove the supplied token and URL work before trusting them
        let auth = CallAuth::token(
            Some(AccessToken::new(theirs.token.clone())),
            descriptor.base64_tokens,
        )
        .with_tls(party.tls.clone());
        let versions = match self.negotiator.fetch_versions(&theirs.url, &auth).await {
            Ok(versions) => versions,
            Err(e) => return unusable_client_api(&party.identity.to_string(), &e),
        };
        let Some(info) = versions.iter().find(|v| v.version == version) else {
            return ReceiverReply::error(
                StatusCode::OK,
                status::UNABLE_TO_USE_CLIENT_API,
                format!("Unable to use the client's API: version {version} is not offered"),
            );
        };
        let details = match self.negotiator.fetch_version_details(&info.url, &auth).await {
            Ok(details) => details,
            Err(e) => return unusable_client_api(&party.identity.to_string(), &e),
        };
        if details
            .endpoint(&ModuleId::Credentials, Some(InterfaceRole::Sender))
            .is_none()
        {
            return ReceiverReply::error(
                StatusCode::OK,
                status::NO_MATCHING_ENDPOINTS,
                "No credentials endpoint in the client's version details",
            );
        }

        let fresh = if party.local_totp.is_some() {
            None
        } else {
            Some(AccessToken::generate())
        };
        let reply_token = fresh
            .as_ref()
            .map_or_else(|| caller.token.clone(), |t| t.expose().to_string());
        let version_ids: Vec<VersionId> = versions.into_iter().map(|v| v.version).collect();

        let result = self.registry.update(&party.identity, party.revision, |p| {
            if let Some(fresh) = fresh {
                p.local_access_token = Some(fresh);
            }
            if p.remote_totp.is_none() {
                p.remote_access_token = Some(AccessToken::new(theirs.token.clone()));
            }
            p.remote_versions_url = Some(theirs.url.clone());
            if !theirs.roles.is_empty() {
                p.credentials_roles = theirs.roles.clone();
            }
            p.remote_version_ids = version_ids;
            p.selected_version = Some(version.clone());
            p.remote_endpoints = details.endpoints;
            p.remote_access_status = RemoteAccessStatus::Online;
        });

        match result {
            Ok(updated) => {
                tracing::info!(party = %updated.identity, %version, "credentials accepted");
                let ours = self.node.credentials(&reply_token);
                ReceiverReply::ok(ours.to_wire(descriptor.credentials_shape))
            }
            Err(e) => store_failure(&e),
        }
    }
}

fn unusable_client_api(party: &str, error: &crate::versions::NegotiationError) -> ReceiverReply {
    tracing::warn!(party, error = %error, "cannot reach the client's versions");
    ReceiverReply::error(
        StatusCode::OK,
        status::UNABLE_TO_USE_CLIENT_API,
        format!("Unable to use the client's API: {error}"),
    )
}

fn store_failure(error: &Error) -> ReceiverReply {
    if error.is_retryable() {
        ReceiverReply::error(
            StatusCode::CONFLICT,
            status::GENERIC_SERVER_ERROR,
            "Party was modified concurrently, retry the request",
        )
    } else {
        tracing::error!(error = %error, "party store failure");
        ReceiverReply::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            status::GENERIC_SERVER_ERROR,
            "Internal error",
        )
    }
}
