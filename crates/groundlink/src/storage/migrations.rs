//! Schema versioning for the telemetry database.
//!
//! The base tables are created idempotently, then every entry of
//! [`MIGRATIONS`] newer than the stored version is applied in its own
//! transaction. The version lives in the `metadata` table.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::{CREATE_MISSION_TIME_INDEX, SCHEMA_STATEMENTS};

/// The current schema version.
pub const CURRENT_VERSION: i32 = 2;

const VERSION_KEY: &str = "schema_version";

/// One step from `version - 1` to `version`.
#[derive(Debug)]
struct Migration {
    version: i32,
    name: &'static str,
    statements: &'static [&'static str],
}

/// Version 1 is the base schema from [`SCHEMA_STATEMENTS`].
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "base schema",
        statements: &[],
    },
    Migration {
        version: 2,
        name: "mission time index",
        statements: &[CREATE_MISSION_TIME_INDEX],
    },
];

/// Create missing tables and bring the schema up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns [`Error::DatabaseMigration`] if the database was written by a newer
/// version or holds an unreadable version, or a query error if a statement
/// fails.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let stored = schema_version(conn)?;
    if stored > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {stored} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > stored) {
        apply(conn, migration)?;
    }
    if stored < CURRENT_VERSION {
        info!(from = stored, to = CURRENT_VERSION, "Database schema migrated");
    }
    Ok(())
}

/// Stored schema version, 0 for a fresh database.
fn schema_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
    }
}

fn apply(conn: &mut Connection, migration: &Migration) -> Result<()> {
    let tx = conn.transaction()?;
    for statement in migration.statements {
        tx.execute(statement, [])?;
    }
    tx.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, migration.version.to_string()),
    )?;
    tx.commit()?;
    info!(version = migration.version, name = migration.name, "Applied migration");
    Ok(())
}
