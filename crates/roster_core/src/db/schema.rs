//! Schema creation derived from the entity registry.
//!
//! # Responsibility
//! - Turn registered `EntityMapping`s into tables and foreign-key indexes.
//! - Mirror the applied schema version to `PRAGMA user_version`.
//!
//! # Invariants
//! - Table creation is idempotent (`IF NOT EXISTS`) and atomic.
//! - A database stamped with a newer version is left untouched.

use crate::db::{DbError, DbResult};
use crate::mapping::EntityRegistry;
use log::info;
use rusqlite::Connection;

/// Schema version written by this binary.
pub const SCHEMA_VERSION: u32 = 1;

/// Creates every registered table that does not exist yet.
pub fn apply_schema(conn: &mut Connection, registry: &EntityRegistry) -> DbResult<()> {
    let current_version = current_user_version(conn)?;
    if current_version > SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: SCHEMA_VERSION,
        });
    }

    let statements = registry.schema_sql();
    let tx = conn.transaction()?;
    for statement in &statements {
        tx.execute_batch(statement)?;
    }
    tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    tx.commit()?;

    info!(
        "event=schema_apply module=db status=ok entities={} statements={} from_version={} version={}",
        registry.len(),
        statements.len(),
        current_version,
        SCHEMA_VERSION
    );
    Ok(())
}

/// Reads `PRAGMA user_version` from the connection.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

/// Returns whether `table` exists in the connected database.
pub fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

/// Returns whether `table` has a column named `column`.
pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> DbResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
