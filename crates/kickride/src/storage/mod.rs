//! Storage layer for kickride.
//!
//! A single `SQLite` connection guarded by a mutex. Reads borrow the
//! connection directly; every mutation runs inside an IMMEDIATE transaction
//! so the database's single-writer lock serialises competing writers before
//! they read any state they intend to change. Per-table queries live in
//! submodules as free functions over `&Connection`, which lets callers
//! compose them inside one transaction or savepoint.

pub mod kickboards;
pub mod kpis;
pub mod migrations;
pub mod paths;
pub mod riders;
pub mod rides;
pub mod risk_events;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geo::{self, GeoPoint};

/// How long a writer waits on another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage engine for kickride entities.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run read-only queries against the connection.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or an internal error if the connection
    /// lock is poisoned.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside an IMMEDIATE transaction, committing when it returns
    /// `Ok`. Any error rolls the whole unit back.
    ///
    /// `f` receives the transaction mutably so it can open savepoints for
    /// best-effort sub-steps.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or a database error if the transaction
    /// cannot be started or committed.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("storage connection lock poisoned"))
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let mut stats = self.read(|conn| {
            let count = |sql: &str| -> Result<i64> {
                Ok(conn.query_row(sql, [], |row| row.get(0))?)
            };
            let last_ride: Option<String> = conn
                .query_row(
                    "SELECT start_time FROM rides ORDER BY start_time DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(StorageStats {
                kickboards: count("SELECT COUNT(*) FROM kickboards")?,
                riders: count("SELECT COUNT(*) FROM riders")?,
                kpis: count("SELECT COUNT(*) FROM kpis")?,
                rides: count("SELECT COUNT(*) FROM rides")?,
                active_rides: count("SELECT COUNT(*) FROM rides WHERE end_time IS NULL")?,
                risk_events: count("SELECT COUNT(*) FROM risk_events")?,
                last_ride_start: last_ride
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
                db_size_bytes: 0,
            })
        })?;

        if self.path.to_string_lossy() != ":memory:" {
            stats.db_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        }
        Ok(stats)
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StorageStats {
    /// Registered kickboards.
    pub kickboards: i64,
    /// Known riders.
    pub riders: i64,
    /// KPI catalog size.
    pub kpis: i64,
    /// All rides, active and completed.
    pub rides: i64,
    /// Rides without an end time.
    pub active_rides: i64,
    /// Persisted risk events.
    pub risk_events: i64,
    /// Start of the most recent ride.
    pub last_ride_start: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// Encode a timestamp with a fixed width so stored values sort lexically.
pub(crate) fn encode_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

pub(crate) fn decode_point(idx: usize, raw: &str) -> rusqlite::Result<GeoPoint> {
    geo::from_point(raw).map_err(|e| conversion_error(idx, e.to_string()))
}

pub(crate) fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

pub(crate) fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    #[test]
    fn test_open_in_memory() {
        let storage = Storage::open_in_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_path() {
        let storage = create_test_storage();
        assert_eq!(storage.path().to_string_lossy(), ":memory:");
    }

    #[test]
    fn test_write_commits_on_ok() {
        let storage = create_test_storage();
        storage
            .write(|tx| {
                tx.execute("INSERT INTO riders (id, display_name) VALUES (1, 'a')", [])?;
                Ok(())
            })
            .unwrap();

        assert_eq!(storage.stats().unwrap().riders, 1);
    }

    #[test]
    fn test_write_rolls_back_on_error() {
        let storage = create_test_storage();
        let result: Result<()> = storage.write(|tx| {
            tx.execute("INSERT INTO riders (id, display_name) VALUES (1, 'a')", [])?;
            Err(Error::conflict("abort"))
        });

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(storage.stats().unwrap().riders, 0);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let storage = create_test_storage();
        let result = storage.write(|tx| {
            tx.execute(
                "INSERT INTO rides (rider_id, kickboard_id, start_location, start_time)
                 VALUES (42, 'K1', 'POINT(0 0)', '2024-01-01T00:00:00.000000Z')",
                [],
            )?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_stats_empty() {
        let storage = create_test_storage();
        let stats = storage.stats().unwrap();

        assert_eq!(stats.rides, 0);
        assert_eq!(stats.active_rides, 0);
        assert!(stats.last_ride_start.is_none());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_encode_time_sorts_lexically() {
        let early = DateTime::parse_from_rfc3339("2024-01-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(encode_time(early) < encode_time(late));
        assert_eq!(decode_time(0, &encode_time(late)).unwrap(), late);
    }

    #[test]
    fn test_decode_point_error_is_conversion_failure() {
        let err = decode_point(3, "garbage").unwrap_err();
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(3, _, _)));
    }

    #[test]
    fn test_open_file_based() {
        let temp_dir = std::env::temp_dir();
        let db_path = temp_dir.join(format!("kickride_test_{}.db", std::process::id()));

        let storage = Storage::open(&db_path).unwrap();
        assert_eq!(storage.path(), db_path);
        assert_eq!(storage.stats().unwrap().rides, 0);

        drop(storage);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp_dir = std::env::temp_dir();
        let root = temp_dir.join(format!("kickride_test_dirs_{}", std::process::id()));
        let nested_path = root.join("nested/db.sqlite");
        let _ = std::fs::remove_dir_all(&root);

        let storage = Storage::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(storage);
        let _ = std::fs::remove_dir_all(&root);
    }
}
