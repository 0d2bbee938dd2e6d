//! Database schema versioning for kickride.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// The current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// Initialize the database schema.
///
/// Creates all tables and indexes if they don't exist, then runs any
/// pending migrations to bring the schema up to the current version.
///
/// # Errors
///
/// Returns an error if schema creation or migration fails.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = get_schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }
    if version < CURRENT_VERSION {
        run_migrations(conn, version)?;
        info!("Database schema migrated to version {}", CURRENT_VERSION);
    }

    Ok(())
}

/// Get the current schema version from the database, 0 for a fresh one.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result: std::result::Result<String, rusqlite::Error> = conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        [VERSION_KEY],
        |row| row.get(0),
    );

    match result {
        Ok(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection, from_version: i32) -> Result<()> {
    let mut current = from_version;

    while current < CURRENT_VERSION {
        current += 1;
        run_migration(conn, current)?;
    }

    set_schema_version(conn, CURRENT_VERSION)?;
    Ok(())
}

fn run_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(Error::DatabaseMigration {
            message: format!("unknown migration version: {version}"),
        }),
    }
}

/// Version 1 is the base schema created by `SCHEMA_STATEMENTS`.
fn migrate_v1(conn: &Connection) -> Result<()> {
    set_schema_version(conn, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        Connection::open_in_memory().expect("failed to create in-memory database")
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    #[test]
    fn test_initialize_schema_creates_tables() {
        let conn = create_test_db();
        initialize_schema(&conn).expect("failed to initialize schema");

        for table in [
            "kickboards",
            "riders",
            "kpis",
            "rides",
            "risk_events",
            "ride_paths",
            "metadata",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }

    #[test]
    fn test_initialize_schema_sets_version() {
        let conn = create_test_db();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_initialize_schema_idempotent() {
        let conn = create_test_db();
        initialize_schema(&conn).expect("first init failed");
        initialize_schema(&conn).expect("second init failed");
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = create_test_db();
        initialize_schema(&conn).unwrap();
        set_schema_version(&conn, CURRENT_VERSION + 1).unwrap();

        let err = initialize_schema(&conn).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_get_schema_version_fresh_db() {
        let conn = create_test_db();
        conn.execute(
            "CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_run_migration_unknown_version() {
        let conn = create_test_db();
        initialize_schema(&conn).unwrap();

        let err = run_migration(&conn, 999).unwrap_err();
        assert!(err.to_string().contains("unknown migration version"));
    }

    #[test]
    fn test_active_ride_index_rejects_second_active_ride() {
        let conn = create_test_db();
        initialize_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO riders (id, display_name) VALUES (1, 'u1')",
            [],
        )
        .unwrap();
        let insert = "INSERT INTO rides (rider_id, kickboard_id, start_location, start_time)
                      VALUES (1, 'K1', 'POINT(0 0)', '2024-01-01T00:00:00.000000Z')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
