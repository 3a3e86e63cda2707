//! Database schema migrations.
//!
//! Each migration is a SQL script upgrading the schema one version step.
//! The current version is recorded in the `storestate` table and walked
//! forward on open.

use crate::schema::{state_keys, SCHEMA_VERSION};
use crate::{DbError, Result};
use rusqlite::Connection;
use tracing::info;

struct Migration {
    from_version: i32,
    to_version: i32,
    upgrade_sql: &'static str,
    description: &'static str,
}

/// All available migrations. Empty while the schema is at its first
/// version; future steps append here.
const MIGRATIONS: &[Migration] = &[];

/// Get the schema version recorded in the database.
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result: std::result::Result<String, _> = conn.query_row(
        "SELECT state FROM storestate WHERE statename = ?1",
        [state_keys::DATABASE_SCHEMA],
        |row| row.get(0),
    );
    match result {
        Ok(text) => text
            .parse::<i32>()
            .map_err(|_| DbError::Integrity(format!("bad schema version {text:?}"))),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(SCHEMA_VERSION),
        Err(e) => Err(e.into()),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO storestate (statename, state) VALUES (?1, ?2)",
        rusqlite::params![state_keys::DATABASE_SCHEMA, version.to_string()],
    )?;
    Ok(())
}

/// Walk the database forward to [`SCHEMA_VERSION`].
pub fn apply(conn: &Connection) -> Result<()> {
    let mut version = get_schema_version(conn)?;
    if version > SCHEMA_VERSION {
        return Err(DbError::SchemaVersion(version));
    }
    while version < SCHEMA_VERSION {
        let migration = MIGRATIONS
            .iter()
            .find(|m| m.from_version == version)
            .ok_or(DbError::SchemaVersion(version))?;
        info!(
            from = migration.from_version,
            to = migration.to_version,
            "applying migration: {}",
            migration.description
        );
        conn.execute_batch(migration.upgrade_sql)?;
        version = migration.to_version;
        set_schema_version(conn, version)?;
    }
    set_schema_version(conn, SCHEMA_VERSION)
}
