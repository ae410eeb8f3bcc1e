//! Initiator side of the credentials handshake

use axum::http::Method;
use chrono::Utc;

use super::{RegistrationProtocol, local_error};
use crate::client::CallAuth;
use crate::ocpi::{
    Credentials, InterfaceRole, LocalError, ModuleId, OcpiResponse, VersionDetails, VersionId,
    descriptor,
};
use crate::parties::{PartyIdentity, RemoteAccessStatus, RemoteParty};
use crate::security::AccessToken;
use crate::versions::{NegotiationError, select_version};

/// Re-reads allowed when a concurrent writer moves the record mid-exchange
const SETTLE_ATTEMPTS: usize = 5;

/// Caller choices for one registration run
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Register with exactly this version instead of the highest common one
    pub version: Option<VersionId>,
    /// Fail with `NotRegistered` instead of falling back to POST
    pub require_registered: bool,
}

impl RegisterOptions {
    /// Pin the version
    #[must_use]
    pub fn version(version: VersionId) -> Self {
        Self {
            version: Some(version),
            require_registered: false,
        }
    }
}

/// Agreed version and the counterparty's endpoints for it
struct Negotiated {
    version: VersionId,
    version_ids: Vec<VersionId>,
    details: VersionDetails,
}

impl RegistrationProtocol {
    /// Register with a party, or re-register if already registered
    ///
    /// Sends POST on first registration and PUT afterwards. On success the
    /// returned record holds the new token pair, the selected version and the
    /// counterparty's endpoints. Failures leave the token pair and the selected
    /// version as they were.
    pub async fn register(
        &self,
        identity: &PartyIdentity,
        options: RegisterOptions,
    ) -> OcpiResponse<RemoteParty> {
        let party = match self.registry.get(identity) {
            Ok(party) => party,
            Err(e) => return OcpiResponse::local(local_error(&e)),
        };

        if options.require_registered && !party.is_registered() {
            return OcpiResponse::local(LocalError::NotRegistered);
        }
        if !party.is_enabled() {
            return OcpiResponse::local(LocalError::PartyDisabled);
        }
        let Some(versions_url) = party.remote_versions_url.clone() else {
            return OcpiResponse::local(LocalError::NoRemoteUrl);
        };

        let negotiated = match self
            .negotiate(&party, &versions_url, options.version.as_ref())
            .await
        {
            Ok(negotiated) => negotiated,
            Err(response) => return response,
        };

        let Some(endpoint) = negotiated
            .details
            .endpoint(&ModuleId::Credentials, Some(InterfaceRole::Receiver))
        else {
            return OcpiResponse::local(LocalError::NoEndpoint(
                ModuleId::Credentials.to_string(),
            ));
        };
        let credentials_url = endpoint.url.clone();

        self.exchange_credentials(party, negotiated, &credentials_url)
            .await
    }

    /// Re-register a registered party, rotating both tokens
    pub async fn reregister(&self, identity: &PartyIdentity) -> OcpiResponse<RemoteParty> {
        self.register(
            identity,
            RegisterOptions {
                version: None,
                require_registered: true,
            },
        )
        .await
    }

    /// Tell a registered party our credentials are void and forget theirs
    pub async fn unregister(&self, identity: &PartyIdentity) -> OcpiResponse<RemoteParty> {
        let party = match self.registry.get(identity) {
            Ok(party) => party,
            Err(e) => return OcpiResponse::local(local_error(&e)),
        };
        if !party.is_enabled() {
            return OcpiResponse::local(LocalError::PartyDisabled);
        }
        let Some(version) = party.selected_version.clone() else {
            return OcpiResponse::local(LocalError::NotRegistered);
        };
        let Some(url) = party
            .endpoint(&ModuleId::Credentials)
            .map(|e| e.url.clone())
        else {
            return OcpiResponse::local(LocalError::NoEndpoint(
                ModuleId::Credentials.to_string(),
            ));
        };

        let auth = self.call_auth(&party, Some(&version));
        let response = self.client.delete_credentials(&url, &auth).await;
        if !response.is_success() {
            tracing::warn!(party = %identity, status_code = response.status_code, "unregistration failed");
            return response.cast();
        }

        let http = response.http.clone();
        match self.registry.update(identity, party.revision, clear_registration) {
            Ok(party) => {
                tracing::info!(party = %identity, "unregistered");
                let mut done = OcpiResponse::success(party);
                done.http = http;
                done
            }
            Err(e) => OcpiResponse::local(local_error(&e)),
        }
    }

    async fn negotiate(
        &self,
        party: &RemoteParty,
        versions_url: &url::Url,
        pin: Option<&VersionId>,
    ) -> Result<Negotiated, OcpiResponse<RemoteParty>> {
        let auth = self.call_auth(party, None);

        let versions = self
            .negotiator
            .fetch_versions(versions_url, &auth)
            .await
            .map_err(|e| self.negotiation_failed(party, e))?;
        let version_ids: Vec<VersionId> = versions.iter().map(|v| v.version.clone()).collect();

        let version = match pin {
            Some(pin) if self.node.offers(pin) && version_ids.contains(pin) => pin.clone(),
            Some(pin) => {
                return Err(OcpiResponse::local(LocalError::UnknownVersion(
                    pin.to_string(),
                )));
            }
            None => select_version(&self.node.versions, &version_ids)
                .map_err(|_| OcpiResponse::local(LocalError::NoCommonVersion))?,
        };

        if let Some(current) = &party.selected_version
            && version < *current
            && !party.allow_downgrades
        {
            tracing::warn!(party = %party.identity, %current, proposed = %version, "downgrade rejected");
            return Err(OcpiResponse::local(LocalError::DowngradeRejected {
                current: current.clone(),
                proposed: version,
            }));
        }

        let Some(info) = versions.iter().find(|v| v.version == version) else {
            return Err(OcpiResponse::local(LocalError::UnknownVersion(
                version.to_string(),
            )));
        };

        let auth = self.call_auth(party, Some(&version));
        let details = self
            .negotiator
            .fetch_version_details(&info.url, &auth)
            .await
            .map_err(|e| self.negotiation_failed(party, e))?;

        Ok(Negotiated {
            version,
            version_ids,
            details,
        })
    }

    fn negotiation_failed(
        &self,
        party: &RemoteParty,
        error: NegotiationError,
    ) -> OcpiResponse<RemoteParty> {
        tracing::warn!(party = %party.identity, error = %error, "version negotiation failed");
        match error {
            NegotiationError::RemoteUnreachable(_) => {
                if let Err(e) = self.registry.set_remote_access_status(
                    &party.identity,
                    party.revision,
                    RemoteAccessStatus::Offline,
                ) {
                    tracing::debug!(party = %party.identity, error = %e, "could not mark party offline");
                }
                OcpiResponse::local(LocalError::NoRemoteUrl)
            }
            NegotiationError::MalformedResponse(e) => {
                OcpiResponse::local(LocalError::MalformedResponse(e))
            }
            NegotiationError::Remote {
                status_code,
                message,
            } => OcpiResponse::error(status_code, message),
        }
    }

    async fn exchange_credentials(
        &self,
        party: RemoteParty,
        negotiated: Negotiated,
        credentials_url: &url::Url,
    ) -> OcpiResponse<RemoteParty> {
        let identity = party.identity.clone();
        let method = if party.is_registered() {
            Method::PUT
        } else {
            Method::POST
        };
        // Sent with the token the party currently knows us by
        let auth: CallAuth = self.call_auth(&party, Some(&negotiated.version));

        // The receiver calls our versions endpoint with the token it gets, so
        // the new local token must be live before the request leaves.
        let (staged, offered_token) = if let Some(totp) = &party.local_totp {
            (party.clone(), totp.token_at(Utc::now()))
        } else {
            let fresh = AccessToken::generate();
            match self
                .registry
                .rotate_local_token(&identity, party.revision, fresh.clone())
            {
                Ok(staged) => (staged, fresh),
                Err(e) => return OcpiResponse::local(local_error(&e)),
            }
        };

        let Some(descriptor) = descriptor(&negotiated.version) else {
            let unknown = LocalError::UnknownVersion(negotiated.version.to_string());
            return self.rollback(&party, &staged, OcpiResponse::local(unknown));
        };
        let ours = self.node.credentials(offered_token.expose());
        let response = if method == Method::POST {
            self.client
                .post_credentials(
                    credentials_url,
                    &auth,
                    &ours,
                    descriptor.credentials_shape,
                    identity.role,
                )
                .await
        } else {
            self.client
                .put_credentials(
                    credentials_url,
                    &auth,
                    &ours,
                    descriptor.credentials_shape,
                    identity.role,
                )
                .await
        };

        let theirs = match (response.is_success(), response.data.clone()) {
            (true, Some(theirs)) => theirs,
            _ => {
                tracing::warn!(party = %identity, %method, status_code = response.status_code, message = ?response.status_message, "credentials exchange failed");
                return self.rollback(&party, &staged, response.cast());
            }
        };

        // The counterparty has committed and spent the token we sent with, so
        // its answer must land even if another writer touched the record.
        let http = response.http.clone();
        let rotated = party.local_totp.is_none();
        let committed = self.settle(&identity, staged.revision, |p| {
            if rotated {
                p.local_access_token = Some(offered_token.clone());
            }
            apply_credentials(p, &theirs, &negotiated);
        });
        match committed {
            Ok(updated) => {
                tracing::info!(
                    party = %identity,
                    %method,
                    version = ?updated.selected_version.as_ref().map(VersionId::as_str),
                    "registration complete"
                );
                let mut done = OcpiResponse::success(updated);
                done.http = http;
                done
            }
            Err(e) => {
                tracing::error!(party = %identity, error = %e, "registration result could not be stored");
                OcpiResponse::local(local_error(&e))
            }
        }
    }

    /// Apply `f` at `expected`, re-reading and reapplying on lost races
    fn settle(
        &self,
        identity: &PartyIdentity,
        mut expected: u64,
        f: impl Fn(&mut RemoteParty),
    ) -> crate::Result<RemoteParty> {
        let mut attempt = 1;
        loop {
            match self.registry.update(identity, expected, &f) {
                Err(e) if e.is_retryable() && attempt < SETTLE_ATTEMPTS => {
                    attempt += 1;
                    expected = self.registry.get(identity)?.revision;
                    tracing::debug!(party = %identity, revision = expected, attempt, "record moved, reapplying");
                }
                other => return other,
            }
        }
    }

    /// Restore the local token the party had before this run
    fn rollback(
        &self,
        original: &RemoteParty,
        staged: &RemoteParty,
        response: OcpiResponse<RemoteParty>,
    ) -> OcpiResponse<RemoteParty> {
        if staged.revision == original.revision {
            return response;
        }
        let previous = original.local_access_token.clone();
        let fresh = staged.local_access_token.clone();
        // Only undo our own rotation, never a token someone else set since
        let restored = self.settle(&original.identity, staged.revision, |p| {
            if p.local_access_token == fresh {
                p.local_access_token.clone_from(&previous);
            }
        });
        if let Err(e) = restored {
            tracing::error!(party = %original.identity, error = %e, "local token rollback failed");
        } else {
            tracing::debug!(party = %original.identity, "local token rolled back");
        }
        response
    }
}

fn apply_credentials(party: &mut RemoteParty, theirs: &Credentials, negotiated: &Negotiated) {
    if party.remote_totp.is_none() {
        party.remote_access_token = Some(AccessToken::new(theirs.token.clone()));
    }
    party.remote_versions_url = Some(theirs.url.clone());
    if !theirs.roles.is_empty() {
        party.credentials_roles = theirs.roles.clone();
    }
    party.remote_version_ids.clone_from(&negotiated.version_ids);
    party.selected_version = Some(negotiated.version.clone());
    party.remote_endpoints.clone_from(&negotiated.details.endpoints);
    party.remote_access_status = RemoteAccessStatus::Online;
}

/// Forget the registration and both static tokens
pub(crate) fn clear_registration(party: &mut RemoteParty) {
    party.remote_access_token = None;
    party.local_access_token = None;
    party.selected_version = None;
    party.remote_endpoints.clear();
    party.remote_access_status = RemoteAccessStatus::Unknown;
}
