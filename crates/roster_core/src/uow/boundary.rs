//! Transaction boundary that owns unit-of-work lifetimes.
//!
//! # Responsibility
//! - Verify the connection carries the registry schema before any work runs.
//! - Open one unit of work per call and close it by commit or rollback.
//!
//! # Invariants
//! - `run` commits only when the closure returns `Ok`.
//! - `run_rolled_back` never commits.

use super::UnitOfWork;
use crate::db::schema::{current_user_version, table_exists, table_has_column, SCHEMA_VERSION};
use crate::mapping::EntityRegistry;
use crate::repo::{RepoError, RepoResult};
use log::{error, info, warn};
use rusqlite::Connection;

/// Opens and closes units of work on one connection.
pub struct TransactionBoundary<'conn> {
    conn: &'conn Connection,
}

impl<'conn> TransactionBoundary<'conn> {
    /// Checks that `conn` holds every table and column `registry` maps.
    ///
    /// # Errors
    /// - `UninitializedConnection` when `PRAGMA user_version` differs.
    /// - `MissingRequiredTable` / `MissingRequiredColumn` for partial schemas.
    pub fn new(conn: &'conn Connection, registry: &EntityRegistry) -> RepoResult<Self> {
        ensure_schema_ready(conn, registry)?;
        Ok(Self { conn })
    }

    /// Starts a unit of work the caller must commit or roll back.
    ///
    /// Dropping it without either rolls back.
    pub fn begin(&self) -> RepoResult<UnitOfWork<'conn>> {
        UnitOfWork::begin(self.conn)
    }

    /// Runs `work` in a fresh unit of work; commits on `Ok`, rolls back on `Err`.
    ///
    /// A failed rollback is logged; the caller still gets `work`'s error.
    pub fn run<R, F>(&self, work: F) -> RepoResult<R>
    where
        F: FnOnce(&UnitOfWork<'conn>) -> RepoResult<R>,
    {
        let uow = self.begin()?;
        match work(&uow) {
            Ok(value) => {
                uow.commit()?;
                Ok(value)
            }
            Err(err) => {
                warn!(
                    "event=uow_run module=uow status=error uow_id={} error={}",
                    uow.id(),
                    err
                );
                rollback_after_error(uow);
                Err(err)
            }
        }
    }

    /// Runs `work` and always rolls back, whatever it returns.
    pub fn run_rolled_back<R, F>(&self, work: F) -> RepoResult<R>
    where
        F: FnOnce(&UnitOfWork<'conn>) -> RepoResult<R>,
    {
        let uow = self.begin()?;
        match work(&uow) {
            Ok(value) => {
                uow.rollback()?;
                Ok(value)
            }
            Err(err) => {
                rollback_after_error(uow);
                Err(err)
            }
        }
    }
}

fn rollback_after_error(uow: UnitOfWork<'_>) {
    let uow_id = uow.id();
    if let Err(rollback_err) = uow.rollback() {
        error!(
            "event=uow_rollback module=uow status=error uow_id={} error={}",
            uow_id, rollback_err
        );
    }
}

fn ensure_schema_ready(conn: &Connection, registry: &EntityRegistry) -> RepoResult<()> {
    let actual_version = current_user_version(conn)?;
    if actual_version != SCHEMA_VERSION {
        return Err(RepoError::UninitializedConnection {
            expected_version: SCHEMA_VERSION,
            actual_version,
        });
    }

    for mapping in registry.mappings() {
        if !table_exists(conn, mapping.table())? {
            return Err(RepoError::MissingRequiredTable(mapping.table()));
        }
        let columns = std::iter::once(mapping.id_column())
            .chain(mapping.columns().iter().map(|column| column.column));
        for column in columns {
            if !table_has_column(conn, mapping.table(), column)? {
                return Err(RepoError::MissingRequiredColumn {
                    table: mapping.table(),
                    column,
                });
            }
        }
    }

    info!(
        "event=schema_check module=uow status=ok entities={} version={}",
        registry.len(),
        SCHEMA_VERSION
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::TransactionBoundary;
    use crate::db::open_db_in_memory;
    use crate::model::roster_registry;
    use crate::repo::{RepoError, RepoResult};
    use rusqlite::Connection;

    #[test]
    fn rejects_connection_without_schema() {
        let registry = roster_registry().unwrap();
        let conn = Connection::open_in_memory().unwrap();
        let err = TransactionBoundary::new(&conn, &registry).err().unwrap();
        assert!(matches!(
            err,
            RepoError::UninitializedConnection {
                expected_version: 1,
                actual_version: 0
            }
        ));
    }

    #[test]
    fn rejects_missing_table_at_current_version() {
        let registry = roster_registry().unwrap();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA user_version = 1;").unwrap();
        let err = TransactionBoundary::new(&conn, &registry).err().unwrap();
        assert!(matches!(err, RepoError::MissingRequiredTable("team")));
    }

    #[test]
    fn rejects_missing_column() {
        let registry = roster_registry().unwrap();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE team (team_id INTEGER PRIMARY KEY AUTOINCREMENT);
             PRAGMA user_version = 1;",
        )
        .unwrap();
        let err = TransactionBoundary::new(&conn, &registry).err().unwrap();
        assert!(matches!(
            err,
            RepoError::MissingRequiredColumn {
                table: "team",
                column: "name"
            }
        ));
    }

    #[test]
    fn run_commits_on_ok_and_rolls_back_on_err() {
        let registry = roster_registry().unwrap();
        let conn = open_db_in_memory(&registry).unwrap();
        let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

        boundary
            .run(|uow| uow.execute("INSERT INTO team (name) VALUES ('kept');", []))
            .unwrap();
        let failed: Result<(), RepoError> = boundary.run(|uow| {
            uow.execute("INSERT INTO team (name) VALUES ('dropped');", [])?;
            Err(RepoError::UnsupportedOperation("abort".to_string()))
        });
        assert!(failed.is_err());
        boundary
            .run_rolled_back(|uow| uow.execute("INSERT INTO team (name) VALUES ('scratch');", []))
            .unwrap();

        let names: Vec<String> = conn
            .prepare("SELECT name FROM team ORDER BY team_id;")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(names, vec!["kept".to_string()]);
    }

    #[test]
    fn work_error_wins_over_failed_rollback() {
        let registry = roster_registry().unwrap();
        let conn = open_db_in_memory(&registry).unwrap();
        let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

        let abort_outside_boundary = |uow: &crate::uow::UnitOfWork<'_>| -> RepoResult<()> {
            uow.connection().execute_batch("ROLLBACK;")?;
            Err(RepoError::UnsupportedOperation("abort".to_string()))
        };
        let committed = boundary.run(abort_outside_boundary).unwrap_err();
        assert!(matches!(committed, RepoError::UnsupportedOperation(ref reason) if reason == "abort"));
        let rolled_back = boundary.run_rolled_back(abort_outside_boundary).unwrap_err();
        assert!(matches!(rolled_back, RepoError::UnsupportedOperation(ref reason) if reason == "abort"));
    }
}
