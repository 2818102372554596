use rosterdb_core::db::migrations::latest_version;
use rosterdb_core::db::{open_db, open_db_in_memory, DbError};
use rosterdb_core::{RepoError, Store, StoreConfig};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "member");
    assert_table_exists(&conn, "team");
    assert_table_exists(&conn, "item");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roster.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "member");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn deleting_a_team_nulls_member_foreign_keys() {
    let conn = open_db_in_memory().unwrap();
    conn.execute("INSERT INTO team (name) VALUES ('teamA')", [])
        .unwrap();
    let team_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO member (username, age, team_id) VALUES ('m1', 10, ?1)",
        [team_id],
    )
    .unwrap();

    conn.execute("DELETE FROM team WHERE team_id = ?1", [team_id])
        .unwrap();
    let team: Option<i64> = conn
        .query_row("SELECT team_id FROM member WHERE username = 'm1'", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(team, None);
}

#[test]
fn store_rejects_database_missing_a_registered_column() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drifted.db");
    let conn = open_db(&path).unwrap();
    conn.execute_batch("ALTER TABLE item DROP COLUMN last_modified_by;")
        .unwrap();
    drop(conn);

    let Err(err) = Store::open(StoreConfig::default().with_db_path(path.clone())) else {
        panic!("store opened over a drifted schema");
    };
    assert!(
        matches!(err, RepoError::MissingRequiredColumn { ref table, ref column } if table == "item" && column == "last_modified_by"),
        "unexpected error: {err}"
    );
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
