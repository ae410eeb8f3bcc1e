//! Party registry: the only shared mutable state of the engine
//!
//! Every mutation is a compare-and-swap on the record's `revision`. A writer
//! that loses the race gets `ConcurrentModification` and decides itself
//! whether to re-read and retry; nothing here retries on its behalf.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::store::PartyStore;
use super::types::{
    LocalAccessStatus, PartyDraft, PartyIdentity, PartyStatus, RemoteAccessStatus, RemoteParty,
};
use crate::security::AccessToken;
use crate::{Error, Result};

/// Registry of known counterparties
#[derive(Clone)]
pub struct PartyRegistry {
    store: Arc<dyn PartyStore>,
}

impl std::fmt::Debug for PartyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartyRegistry").finish_non_exhaustive()
    }
}

impl PartyRegistry {
    /// Create a registry over a store
    #[must_use]
    pub fn new(store: Arc<dyn PartyStore>) -> Self {
        Self { store }
    }

    /// Registry over a fresh in-memory store
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(super::MemoryPartyStore::new()))
    }

    /// The backing store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn PartyStore> {
        &self.store
    }

    /// Insert or update a party keyed by identity
    ///
    /// Tokens and URLs the draft leaves unset keep their stored values.
    /// Registration state (selected version, endpoints, access statuses)
    /// is never touched by an upsert.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateParty` if the stored record has roles missing from
    /// the draft and disallows downgrades, `ConcurrentModification` if another
    /// writer got there first
    pub fn add_or_update(&self, draft: PartyDraft) -> Result<RemoteParty> {
        let now = Utc::now();

        let Some(existing) = self.store.get(&draft.identity)? else {
            let party = RemoteParty {
                identity: draft.identity,
                credentials_roles: draft.credentials_roles,
                local_access_token: draft.local_access_token,
                local_totp: draft.local_totp,
                local_access_status: LocalAccessStatus::Allowed,
                remote_access_token: draft.remote_access_token,
                remote_totp: draft.remote_totp,
                remote_versions_url: draft.remote_versions_url,
                remote_version_ids: draft.remote_version_ids,
                selected_version: None,
                remote_endpoints: Vec::new(),
                remote_access_status: RemoteAccessStatus::Unknown,
                tls: draft.tls,
                party_status: draft.party_status,
                allow_downgrades: draft.allow_downgrades,
                revision: 1,
                created: now,
                last_updated: now,
            };
            self.store.insert(&party)?;
            tracing::info!(party = %party.identity, "party added");
            return Ok(party);
        };

        if !draft.credentials_roles.is_empty() && !existing.allow_downgrades {
            let dropped = existing.credentials_roles.iter().find(|role| {
                !draft
                    .credentials_roles
                    .iter()
                    .any(|candidate| candidate.same_role(role))
            });
            if let Some(dropped) = dropped {
                return Err(Error::DuplicateParty(format!(
                    "{} already registered with role {} {}*{}",
                    existing.identity, dropped.role, dropped.country_code, dropped.party_id
                )));
            }
        }

        let expected = existing.revision;
        let mut party = existing;
        if !draft.credentials_roles.is_empty() {
            party.credentials_roles = draft.credentials_roles;
        }
        if draft.local_access_token.is_some() {
            party.local_access_token = draft.local_access_token;
        }
        if draft.local_totp.is_some() {
            party.local_totp = draft.local_totp;
        }
        if draft.remote_access_token.is_some() {
            party.remote_access_token = draft.remote_access_token;
        }
        if draft.remote_totp.is_some() {
            party.remote_totp = draft.remote_totp;
        }
        if draft.remote_versions_url.is_some() {
            party.remote_versions_url = draft.remote_versions_url;
        }
        if !draft.remote_version_ids.is_empty() {
            party.remote_version_ids = draft.remote_version_ids;
        }
        if draft.tls.is_some() {
            party.tls = draft.tls;
        }
        party.party_status = draft.party_status;
        party.allow_downgrades = draft.allow_downgrades;

        let party = self.commit(expected, party, now)?;
        tracing::info!(party = %party.identity, revision = party.revision, "party updated");
        Ok(party)
    }

    /// Look up a party
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the identity is unknown
    pub fn get(&self, identity: &PartyIdentity) -> Result<RemoteParty> {
        self.store
            .get(identity)?
            .ok_or_else(|| Error::NotFound(identity.to_string()))
    }

    /// Look up a party, `None` if unknown
    ///
    /// # Errors
    ///
    /// Returns error if the store fails
    pub fn find(&self, identity: &PartyIdentity) -> Result<Option<RemoteParty>> {
        self.store.get(identity)
    }

    /// All parties, ordered by identity
    ///
    /// # Errors
    ///
    /// Returns error if the store fails
    pub fn list(&self) -> Result<Vec<RemoteParty>> {
        self.store.list()
    }

    /// Parties with the given status, ordered by identity
    ///
    /// # Errors
    ///
    /// Returns error if the store fails
    pub fn list_by_status(&self, status: PartyStatus) -> Result<Vec<RemoteParty>> {
        self.store.list_by_status(status)
    }

    /// Delete a party
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the identity is unknown
    pub fn remove(&self, identity: &PartyIdentity) -> Result<()> {
        if self.store.remove(identity)? {
            tracing::info!(party = %identity, "party removed");
            Ok(())
        } else {
            Err(Error::NotFound(identity.to_string()))
        }
    }

    /// Apply `f` to the record if its revision still equals `expected_revision`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `ConcurrentModification`
    pub fn update(
        &self,
        identity: &PartyIdentity,
        expected_revision: u64,
        f: impl FnOnce(&mut RemoteParty),
    ) -> Result<RemoteParty> {
        let mut party = self.get(identity)?;
        if party.revision != expected_revision {
            return Err(Error::ConcurrentModification {
                identity: identity.to_string(),
                expected: expected_revision,
            });
        }

        f(&mut party);
        party.identity = identity.clone();
        self.commit(expected_revision, party, Utc::now())
    }

    /// Replace the token the party presents to us
    ///
    /// The old token stops authenticating as soon as this returns.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `ConcurrentModification`
    pub fn rotate_local_token(
        &self,
        identity: &PartyIdentity,
        expected_revision: u64,
        token: AccessToken,
    ) -> Result<RemoteParty> {
        let party = self.update(identity, expected_revision, |p| {
            p.local_access_token = Some(token);
        })?;
        tracing::debug!(party = %identity, revision = party.revision, "local token rotated");
        Ok(party)
    }

    /// Replace the token we present to the party
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `ConcurrentModification`
    pub fn rotate_remote_token(
        &self,
        identity: &PartyIdentity,
        expected_revision: u64,
        token: AccessToken,
    ) -> Result<RemoteParty> {
        let party = self.update(identity, expected_revision, |p| {
            p.remote_access_token = Some(token);
        })?;
        tracing::debug!(party = %identity, revision = party.revision, "remote token rotated");
        Ok(party)
    }

    /// Enable or disable a party
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `ConcurrentModification`
    pub fn set_party_status(
        &self,
        identity: &PartyIdentity,
        expected_revision: u64,
        status: PartyStatus,
    ) -> Result<RemoteParty> {
        let party = self.update(identity, expected_revision, |p| p.party_status = status)?;
        tracing::info!(party = %identity, ?status, "party status changed");
        Ok(party)
    }

    /// Record the party's reachability
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `ConcurrentModification`
    pub fn set_remote_access_status(
        &self,
        identity: &PartyIdentity,
        expected_revision: u64,
        status: RemoteAccessStatus,
    ) -> Result<RemoteParty> {
        self.update(identity, expected_revision, |p| p.remote_access_status = status)
    }

    /// Allow or block the party's local token
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `ConcurrentModification`
    pub fn set_local_access_status(
        &self,
        identity: &PartyIdentity,
        expected_revision: u64,
        status: LocalAccessStatus,
    ) -> Result<RemoteParty> {
        let party = self.update(identity, expected_revision, |p| {
            p.local_access_status = status;
        })?;
        tracing::info!(party = %identity, ?status, "local access status changed");
        Ok(party)
    }

    /// Party whose local token (static or TOTP) matches `presented` at `now`
    ///
    /// Blocked parties never match.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails
    pub fn find_by_local_token(
        &self,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RemoteParty>> {
        if let Some(party) = self.store.find_by_local_token(presented)?
            && party.accepts(presented, now)
        {
            return Ok(Some(party));
        }
        Ok(self
            .store
            .list_totp()?
            .into_iter()
            .find(|party| party.accepts(presented, now)))
    }

    fn commit(
        &self,
        expected_revision: u64,
        mut party: RemoteParty,
        now: DateTime<Utc>,
    ) -> Result<RemoteParty> {
        party.revision = expected_revision + 1;
        party.last_updated = now;
        self.store.compare_and_swap(expected_revision, &party)?;
        Ok(party)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ocpi::{BusinessDetails, CredentialsRole};
    use crate::parties::Role;
    use crate::security::TotpConfig;

    fn identity() -> PartyIdentity {
        "NL*ABC*EMSP".parse().unwrap()
    }

    fn role(role: Role) -> CredentialsRole {
        CredentialsRole {
            role,
            party_id: "ABC".to_string(),
            country_code: "NL".to_string(),
            business_details: BusinessDetails {
                name: "ABC".to_string(),
                website: None,
            },
        }
    }

    fn seeded() -> (PartyRegistry, RemoteParty) {
        let registry = PartyRegistry::in_memory();
        let party = registry
            .add_or_update(
                PartyDraft::new(identity())
                    .local_token(AccessToken::new("their-token"))
                    .roles(vec![role(Role::Emsp)]),
            )
            .unwrap();
        (registry, party)
    }

    #[test]
    fn add_then_get() {
        let (registry, party) = seeded();
        assert_eq!(party.revision, 1);
        assert_eq!(registry.get(&identity()).unwrap(), party);
        assert!(matches!(
            registry.get(&"DE*XYZ*CPO".parse().unwrap()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn upsert_is_idempotent_and_keeps_unset_fields() {
        let (registry, _) = seeded();
        let updated = registry
            .add_or_update(PartyDraft::new(identity()).roles(vec![role(Role::Emsp)]))
            .unwrap();
        assert_eq!(updated.revision, 2);
        assert_eq!(
            updated.local_access_token,
            Some(AccessToken::new("their-token"))
        );
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn upsert_dropping_roles_is_duplicate_unless_downgrades_allowed() {
        let (registry, _) = seeded();
        let err = registry
            .add_or_update(PartyDraft::new(identity()).roles(vec![role(Role::Cpo)]))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateParty(_)));

        // Superset keeps every existing role
        registry
            .add_or_update(
                PartyDraft::new(identity())
                    .roles(vec![role(Role::Emsp), role(Role::Cpo)])
                    .allow_downgrades(true),
            )
            .unwrap();
        let party = registry
            .add_or_update(PartyDraft::new(identity()).roles(vec![role(Role::Cpo)]))
            .unwrap();
        assert_eq!(party.credentials_roles, vec![role(Role::Cpo)]);
    }

    #[test]
    fn stale_revision_loses() {
        let (registry, party) = seeded();
        registry
            .rotate_local_token(&identity(), party.revision, AccessToken::new("a"))
            .unwrap();

        let err = registry
            .rotate_local_token(&identity(), party.revision, AccessToken::new("b"))
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            registry.get(&identity()).unwrap().local_access_token,
            Some(AccessToken::new("a"))
        );
    }

    #[test]
    fn rotated_token_replaces_old_immediately() {
        let (registry, party) = seeded();
        let now = Utc::now();
        assert!(registry.find_by_local_token("their-token", now).unwrap().is_some());

        registry
            .rotate_local_token(&identity(), party.revision, AccessToken::new("fresh"))
            .unwrap();
        assert!(registry.find_by_local_token("their-token", now).unwrap().is_none());
        assert_eq!(
            registry
                .find_by_local_token("fresh", now)
                .unwrap()
                .map(|p| p.identity),
            Some(identity())
        );
    }

    #[test]
    fn remote_token_rotation_leaves_local_token_alone() {
        let (registry, party) = seeded();
        let rotated = registry
            .rotate_remote_token(&identity(), party.revision, AccessToken::new("ours"))
            .unwrap();
        assert_eq!(rotated.remote_access_token, Some(AccessToken::new("ours")));
        assert_eq!(rotated.outbound_token(Utc::now()), Some(AccessToken::new("ours")));
        assert_eq!(rotated.local_access_token, party.local_access_token);

        // The token we present never authenticates callers
        assert!(registry.find_by_local_token("ours", Utc::now()).unwrap().is_none());
        assert!(
            registry
                .rotate_remote_token(&identity(), party.revision, AccessToken::new("late"))
                .unwrap_err()
                .is_retryable()
        );
    }

    #[test]
    fn list_by_status_filters() {
        let (registry, party) = seeded();
        registry
            .add_or_update(PartyDraft::new("DE*GEF*CPO".parse().unwrap()))
            .unwrap();
        registry
            .set_party_status(&identity(), party.revision, PartyStatus::Disabled)
            .unwrap();

        let disabled = registry.list_by_status(PartyStatus::Disabled).unwrap();
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0].identity, identity());
        assert_eq!(registry.list_by_status(PartyStatus::Enabled).unwrap().len(), 1);
    }

    #[test]
    fn blocked_parties_do_not_authenticate() {
        let (registry, party) = seeded();
        registry
            .set_local_access_status(&identity(), party.revision, LocalAccessStatus::Blocked)
            .unwrap();
        assert!(
            registry
                .find_by_local_token("their-token", Utc::now())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn totp_tokens_authenticate() {
        let registry = PartyRegistry::in_memory();
        let totp = TotpConfig::new("seed", Duration::from_secs(30));
        registry
            .add_or_update(PartyDraft::new(identity()).local_totp(totp.clone()))
            .unwrap();

        let now = Utc::now();
        let token = totp.token_at(now);
        assert!(registry.find_by_local_token(token.expose(), now).unwrap().is_some());
    }

    #[test]
    fn status_changes_bump_revision() {
        let (registry, party) = seeded();
        let disabled = registry
            .set_party_status(&identity(), party.revision, PartyStatus::Disabled)
            .unwrap();
        assert!(!disabled.is_enabled());
        let online = registry
            .set_remote_access_status(&identity(), disabled.revision, RemoteAccessStatus::Online)
            .unwrap();
        assert_eq!(online.revision, party.revision + 2);
        assert_eq!(online.remote_access_status, RemoteAccessStatus::Online);
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let (registry, _) = seeded();
        registry.remove(&identity()).unwrap();
        assert!(matches!(
            registry.remove(&identity()),
            Err(Error::NotFound(_))
        ));
    }
}
