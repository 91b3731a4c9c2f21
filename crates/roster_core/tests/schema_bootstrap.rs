use roster_core::db::schema::{current_user_version, table_exists, table_has_column, SCHEMA_VERSION};
use roster_core::db::{open_db, open_db_in_memory, open_store, DbError};
use roster_core::{roster_registry, StoreConfig, TransactionBoundary};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_creates_registered_tables() {
    let registry = roster_registry().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();

    assert_eq!(current_user_version(&conn).unwrap(), SCHEMA_VERSION);
    assert!(table_exists(&conn, "team").unwrap());
    assert!(table_exists(&conn, "member").unwrap());
    for column in ["member_id", "username", "age", "team_id", "created_date", "updated_date"] {
        assert!(table_has_column(&conn, "member", column).unwrap(), "{column}");
    }
    assert!(TransactionBoundary::new(&conn, &registry).is_ok());
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let registry = roster_registry().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roster.db");

    let conn_first = open_db(&path, &registry).unwrap();
    conn_first
        .execute("INSERT INTO team (name) VALUES ('teamA');", [])
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&path, &registry).unwrap();
    let teams: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM team;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(teams, 1);
    assert_eq!(current_user_version(&conn_second).unwrap(), SCHEMA_VERSION);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let registry = roster_registry().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path, &registry).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, SCHEMA_VERSION);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn open_store_applies_config_pragmas() {
    let registry = roster_registry().unwrap();
    let config = StoreConfig::from_json_str(r#"{"enforce_foreign_keys": false}"#).unwrap();
    let conn = open_store(&config, &registry).unwrap();

    let foreign_keys: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(foreign_keys, 0);

    let enforced = open_store(&StoreConfig::in_memory(), &registry).unwrap();
    let foreign_keys: i64 = enforced
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(foreign_keys, 1);
}

#[test]
fn open_store_uses_configured_file() {
    let registry = roster_registry().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("configured.db");

    let conn = open_store(&StoreConfig::file(&path), &registry).unwrap();
    drop(conn);
    assert!(path.exists());
}
