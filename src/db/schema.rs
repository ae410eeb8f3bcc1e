//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- One row per counterparty, the record itself stored as JSON
        CREATE TABLE IF NOT EXISTS parties (
            identity TEXT PRIMARY KEY,
            country_code TEXT NOT NULL,
            party_id TEXT NOT NULL,
            role TEXT NOT NULL,
            revision INTEGER NOT NULL,
            record TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::debug!("migrated to schema v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Admin listings filter by party status
        ALTER TABLE parties ADD COLUMN party_status TEXT NOT NULL DEFAULT 'ENABLED';
        CREATE INDEX IF NOT EXISTS idx_parties_status ON parties(party_status);

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::debug!("migrated to schema v2");
    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Inbound authentication looks parties up by the token they present
        ALTER TABLE parties ADD COLUMN local_token TEXT;
        ALTER TABLE parties ADD COLUMN local_totp INTEGER NOT NULL DEFAULT 0;
        UPDATE parties SET
            local_token = json_extract(record, '$.local_access_token'),
            local_totp = json_extract(record, '$.local_totp') IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_parties_local_token ON parties(local_token);

        PRAGMA user_version = 3;
        ",
    )?;

    tracing::debug!("migrated to schema v3");
    Ok(())
}
