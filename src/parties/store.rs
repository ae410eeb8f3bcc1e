//! Durable keyed storage of party records

use std::collections::HashMap;

use parking_lot::RwLock;

use super::types::{PartyIdentity, PartyStatus, RemoteParty};
use crate::{Error, Result};

/// Keyed store of [`RemoteParty`] records with compare-and-swap writes
///
/// Implementations must apply `compare_and_swap` atomically: the write only
/// lands if the stored revision still equals `expected_revision`.
pub trait PartyStore: Send + Sync {
    /// Fetch one record
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn get(&self, identity: &PartyIdentity) -> Result<Option<RemoteParty>>;

    /// All records, ordered by identity
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn list(&self) -> Result<Vec<RemoteParty>>;

    /// Record whose static local token is exactly `token`
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn find_by_local_token(&self, token: &str) -> Result<Option<RemoteParty>>;

    /// Records that authenticate callers by TOTP
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn list_totp(&self) -> Result<Vec<RemoteParty>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| p.local_totp.is_some())
            .collect())
    }

    /// Records with the given party status, ordered by identity
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn list_by_status(&self, status: PartyStatus) -> Result<Vec<RemoteParty>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| p.party_status == status)
            .collect())
    }

    /// Insert a record that must not exist yet
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentModification` if a record with the identity exists
    fn insert(&self, party: &RemoteParty) -> Result<()>;

    /// Replace a record if its stored revision equals `expected_revision`
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentModification` if the revision moved, `NotFound` if
    /// the record is gone
    fn compare_and_swap(&self, expected_revision: u64, party: &RemoteParty) -> Result<()>;

    /// Delete a record, returning whether it existed
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn remove(&self, identity: &PartyIdentity) -> Result<bool>;

    /// Liveness probe for readiness checks
    ///
    /// # Errors
    ///
    /// Returns error if the backing store is unusable
    fn ping(&self) -> Result<()> {
        self.list().map(|_| ())
    }
}

/// In-process store, the default for tests and ephemeral nodes
#[derive(Default)]
pub struct MemoryPartyStore {
    records: RwLock<Records>,
}

/// Records plus the static local token index
#[derive(Default)]
struct Records {
    parties: HashMap<PartyIdentity, RemoteParty>,
    by_token: HashMap<String, PartyIdentity>,
}

impl Records {
    fn put(&mut self, party: &RemoteParty) {
        self.unindex(&party.identity);
        if let Some(token) = &party.local_access_token {
            self.by_token
                .insert(token.expose().to_string(), party.identity.clone());
        }
        self.parties.insert(party.identity.clone(), party.clone());
    }

    fn take(&mut self, identity: &PartyIdentity) -> Option<RemoteParty> {
        self.unindex(identity);
        self.parties.remove(identity)
    }

    fn unindex(&mut self, identity: &PartyIdentity) {
        let Some(token) = self
            .parties
            .get(identity)
            .and_then(|p| p.local_access_token.as_ref())
        else {
            return;
        };
        if self.by_token.get(token.expose()) == Some(identity) {
            self.by_token.remove(token.expose());
        }
    }
}

impl std::fmt::Debug for MemoryPartyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPartyStore")
            .field("parties", &self.records.read().parties.len())
            .finish()
    }
}

impl MemoryPartyStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PartyStore for MemoryPartyStore {
    fn get(&self, identity: &PartyIdentity) -> Result<Option<RemoteParty>> {
        Ok(self.records.read().parties.get(identity).cloned())
    }

    fn list(&self) -> Result<Vec<RemoteParty>> {
        let mut parties: Vec<RemoteParty> =
            self.records.read().parties.values().cloned().collect();
        parties.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(parties)
    }

    fn find_by_local_token(&self, token: &str) -> Result<Option<RemoteParty>> {
        let records = self.records.read();
        Ok(records
            .by_token
            .get(token)
            .and_then(|identity| records.parties.get(identity))
            .cloned())
    }

    fn insert(&self, party: &RemoteParty) -> Result<()> {
        let mut records = self.records.write();
        if records.parties.contains_key(&party.identity) {
            return Err(Error::ConcurrentModification {
                identity: party.identity.to_string(),
                expected: 0,
            });
        }
        records.put(party);
        Ok(())
    }

    fn compare_and_swap(&self, expected_revision: u64, party: &RemoteParty) -> Result<()> {
        let mut records = self.records.write();
        let current = records
            .parties
            .get(&party.identity)
            .ok_or_else(|| Error::NotFound(party.identity.to_string()))?;

        if current.revision != expected_revision {
            return Err(Error::ConcurrentModification {
                identity: party.identity.to_string(),
                expected: expected_revision,
            });
        }

        records.put(party);
        Ok(())
    }

    fn remove(&self, identity: &PartyIdentity) -> Result<bool> {
        Ok(self.records.write().take(identity).is_some())
    }
}
