//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Apply connection pragmas from `StoreConfig`.
//! - Create registry-derived tables before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have the registry schema fully applied.
//! - Foreign keys are enforced unless the config explicitly disables them.

use super::schema::apply_schema;
use super::DbResult;
use crate::config::StoreConfig;
use crate::mapping::EntityRegistry;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::Instant;

/// Opens a SQLite database file with default settings and applies the schema.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>, registry: &EntityRegistry) -> DbResult<Connection> {
    let config = StoreConfig::file(path.as_ref());
    open_with("file", || Connection::open(path), &config, registry)
}

/// Opens an in-memory SQLite database with default settings and applies the schema.
pub fn open_db_in_memory(registry: &EntityRegistry) -> DbResult<Connection> {
    open_with(
        "memory",
        Connection::open_in_memory,
        &StoreConfig::in_memory(),
        registry,
    )
}

/// Opens the database described by `config` and applies the schema.
///
/// `database_path = None` selects an in-memory database.
pub fn open_store(config: &StoreConfig, registry: &EntityRegistry) -> DbResult<Connection> {
    match config.database_path.as_deref() {
        Some(path) => open_with("file", || Connection::open(path), config, registry),
        None => open_with("memory", Connection::open_in_memory, config, registry),
    }
}

fn open_with<F>(
    mode: &str,
    opener: F,
    config: &StoreConfig,
    registry: &EntityRegistry,
) -> DbResult<Connection>
where
    F: FnOnce() -> rusqlite::Result<Connection>,
{
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match opener() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, config, registry) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={} foreign_keys={}",
                mode,
                started_at.elapsed().as_millis(),
                config.enforce_foreign_keys
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    config: &StoreConfig,
    registry: &EntityRegistry,
) -> DbResult<()> {
    let foreign_keys = if config.enforce_foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(config.busy_timeout())?;
    apply_schema(conn, registry)?;
    Ok(())
}
