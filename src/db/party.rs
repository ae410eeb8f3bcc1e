//! `SQLite`-backed party store

use rusqlite::{OptionalExtension, params};

use super::DbPool;
use crate::parties::{PartyIdentity, PartyStatus, PartyStore, RemoteParty};
use crate::security::AccessToken;
use crate::{Error, Result};

/// Party store persisting records in the `parties` table
#[derive(Clone)]
pub struct SqlitePartyStore {
    pool: DbPool,
}

impl SqlitePartyStore {
    /// Create a store over a pool initialized by [`super::init`]
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<super::DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    fn query_records(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<RemoteParty>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;

        rows.map(|row| decode(&row?)).collect()
    }
}

const fn status_str(status: PartyStatus) -> &'static str {
    match status {
        PartyStatus::Enabled => "ENABLED",
        PartyStatus::Disabled => "DISABLED",
    }
}

fn decode(json: &str) -> Result<RemoteParty> {
    serde_json::from_str(json).map_err(|e| Error::Database(format!("corrupt party record: {e}")))
}

fn local_token(party: &RemoteParty) -> Option<&str> {
    party.local_access_token.as_ref().map(AccessToken::expose)
}

fn revision_param(revision: u64) -> Result<i64> {
    i64::try_from(revision).map_err(|_| Error::Database(format!("revision {revision} overflows")))
}

impl PartyStore for SqlitePartyStore {
    fn get(&self, identity: &PartyIdentity) -> Result<Option<RemoteParty>> {
        let conn = self.conn()?;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM parties WHERE identity = ?1",
                params![identity.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        record.as_deref().map(decode).transpose()
    }

    fn list(&self) -> Result<Vec<RemoteParty>> {
        self.query_records("SELECT record FROM parties ORDER BY identity", params![])
    }

    fn find_by_local_token(&self, token: &str) -> Result<Option<RemoteParty>> {
        let conn = self.conn()?;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM parties WHERE local_token = ?1 LIMIT 1",
                params![token],
                |row| row.get(0),
            )
            .optional()?;

        record.as_deref().map(decode).transpose()
    }

    fn list_totp(&self) -> Result<Vec<RemoteParty>> {
        self.query_records(
            "SELECT record FROM parties WHERE local_totp = 1 ORDER BY identity",
            params![],
        )
    }

    fn list_by_status(&self, status: PartyStatus) -> Result<Vec<RemoteParty>> {
        self.query_records(
            "SELECT record FROM parties WHERE party_status = ?1 ORDER BY identity",
            params![status_str(status)],
        )
    }

    fn insert(&self, party: &RemoteParty) -> Result<()> {
        let conn = self.conn()?;
        let record = serde_json::to_string(party)?;

        let inserted = conn.execute(
            r"
            INSERT INTO parties
                (identity, country_code, party_id, role, revision, record, party_status, local_token, local_totp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(identity) DO NOTHING
            ",
            params![
                party.identity.to_string(),
                party.identity.country_code,
                party.identity.party_id,
                party.identity.role.as_str(),
                revision_param(party.revision)?,
                record,
                status_str(party.party_status),
                local_token(party),
                party.local_totp.is_some(),
            ],
        )?;

        if inserted == 0 {
            return Err(Error::ConcurrentModification {
                identity: party.identity.to_string(),
                expected: 0,
            });
        }

        tracing::debug!(party = %party.identity, "party row inserted");
        Ok(())
    }

    fn compare_and_swap(&self, expected_revision: u64, party: &RemoteParty) -> Result<()> {
        let conn = self.conn()?;
        let record = serde_json::to_string(party)?;
        let identity = party.identity.to_string();

        let updated = conn.execute(
            r"
            UPDATE parties
            SET revision = ?1, record = ?2, party_status = ?3, local_token = ?4, local_totp = ?5,
                updated_at = datetime('now')
            WHERE identity = ?6 AND revision = ?7
            ",
            params![
                revision_param(party.revision)?,
                record,
                status_str(party.party_status),
                local_token(party),
                party.local_totp.is_some(),
                identity,
                revision_param(expected_revision)?,
            ],
        )?;

        if updated == 1 {
            return Ok(());
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM parties WHERE identity = ?1)",
            params![identity],
            |row| row.get(0),
        )?;
        if exists {
            Err(Error::ConcurrentModification {
                identity,
                expected: expected_revision,
            })
        } else {
            Err(Error::NotFound(identity))
        }
    }

    fn remove(&self, identity: &PartyIdentity) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM parties WHERE identity = ?1",
            params![identity.to_string()],
        )?;
        Ok(deleted > 0)
    }

    fn ping(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::db::init_memory;
    use crate::parties::{PartyDraft, PartyRegistry};
    use crate::security::{TlsMaterial, TlsProtocol, TotpConfig};

    fn registry() -> (PartyRegistry, SqlitePartyStore) {
        let store = SqlitePartyStore::new(init_memory().unwrap());
        (PartyRegistry::new(Arc::new(store.clone())), store)
    }

    fn identity() -> PartyIdentity {
        "DE*GEF*CPO".parse().unwrap()
    }

    #[test]
    fn persists_tokens_and_tls_material() {
        let (registry, store) = registry();
        let added = registry
            .add_or_update(
                PartyDraft::new(identity())
                    .local_token(AccessToken::new("local"))
                    .remote_token(AccessToken::new("remote"))
                    .tls(TlsMaterial::restricted_to(&[TlsProtocol::Tls12])),
            )
            .unwrap();

        let loaded = store.get(&identity()).unwrap().unwrap();
        assert_eq!(loaded, added);
        assert_eq!(
            loaded.tls.unwrap().allowed_protocols(),
            vec![TlsProtocol::Tls12]
        );
    }

    #[test]
    fn cas_rejects_stale_revision() {
        let (registry, store) = registry();
        let party = registry.add_or_update(PartyDraft::new(identity())).unwrap();

        let mut first = party.clone();
        first.revision = 2;
        store.compare_and_swap(1, &first).unwrap();

        let mut second = party;
        second.revision = 2;
        let err = store.compare_and_swap(1, &second).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let (registry, store) = registry();
        let party = registry.add_or_update(PartyDraft::new(identity())).unwrap();
        assert!(store.insert(&party).unwrap_err().is_retryable());
    }

    #[test]
    fn filters_by_status() {
        let (registry, store) = registry();
        let party = registry.add_or_update(PartyDraft::new(identity())).unwrap();
        registry
            .add_or_update(PartyDraft::new("NL*ABC*EMSP".parse().unwrap()))
            .unwrap();
        registry
            .set_party_status(&identity(), party.revision, PartyStatus::Disabled)
            .unwrap();

        let disabled = registry.list_by_status(PartyStatus::Disabled).unwrap();
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0].identity, identity());
        assert_eq!(store.list_by_status(PartyStatus::Enabled).unwrap().len(), 1);
        store.ping().unwrap();
    }

    #[test]
    fn looks_parties_up_by_local_token() {
        let (registry, store) = registry();
        let party = registry
            .add_or_update(PartyDraft::new(identity()).local_token(AccessToken::new("first")))
            .unwrap();
        registry
            .add_or_update(
                PartyDraft::new("NL*ABC*EMSP".parse().unwrap())
                    .local_totp(TotpConfig::new("seed", Duration::from_secs(30))),
            )
            .unwrap();

        assert_eq!(
            store.find_by_local_token("first").unwrap().map(|p| p.identity),
            Some(identity())
        );
        registry
            .rotate_local_token(&identity(), party.revision, AccessToken::new("second"))
            .unwrap();
        assert!(store.find_by_local_token("first").unwrap().is_none());
        assert!(
            registry
                .find_by_local_token("second", Utc::now())
                .unwrap()
                .is_some()
        );

        let totp = store.list_totp().unwrap();
        assert_eq!(totp.len(), 1);
        assert_eq!(totp[0].identity.party_id, "ABC");
    }

    #[test]
    fn cas_on_missing_row_is_not_found() {
        let (registry, store) = registry();
        let party = registry.add_or_update(PartyDraft::new(identity())).unwrap();
        assert!(store.remove(&identity()).unwrap());
        assert!(matches!(
            store.compare_and_swap(party.revision, &party),
            Err(Error::NotFound(_))
        ));
    }
}
