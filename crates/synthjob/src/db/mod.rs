//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access is serialized through a `Mutex<Connection>`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction};

pub mod details_repo;
pub mod error;
pub mod migrations;
pub mod object_repo;
pub mod process_repo;
pub mod queue_repo;
pub mod repository;
pub mod search_repo;

pub use error::{AssertionError, DatabaseError};
pub use repository::{
    ObjectCreator, ObjectGetter, ProcessCreator, ProcessDetailsCreator, ProcessDetailsGetter,
    ProcessDetailsUpdater, ProcessGetter, ProcessLister, ProcessSearcher, ProcessUpdater,
};

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). All access is serialized through
/// a `Mutex`, which is fine for SQLite (which serializes writes anyway).
/// WAL mode is enabled for concurrent read performance.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )?;

        migrations::run_all(&mut conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. The transaction commits only when `f`
    /// returns `Ok`; any error (including a failed assertion) rolls it back.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Returns the canonical database path: `~/.synthjob/data/synthjob.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".synthjob").join("data").join("synthjob.db"))
}

/// Current time at the precision stored in the database.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 text, so lexical order in SQL equals time order.
pub(crate) fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(row: &Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_time(row, column, &raw)
}

pub(crate) fn decode_opt_time(
    row: &Row<'_>,
    column: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|raw| parse_time(row, column, &raw)).transpose()
}

fn parse_time(row: &Row<'_>, column: &str, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            let idx = row.as_ref().column_index(column).unwrap_or_default();
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        })
}

/// Asserts a write touched exactly one row.
pub(crate) fn assert_one_affected(affected: usize) -> Result<(), DatabaseError> {
    if affected != 1 {
        return Err(AssertionError::RowsAffected {
            want: 1,
            got: affected,
        }
        .into());
    }
    Ok(())
}

/// Returns the id generated by the last insert on this connection.
pub(crate) fn last_inserted_id(conn: &Connection) -> Result<i64, DatabaseError> {
    let id = conn.last_insert_rowid();
    if id <= 0 {
        return Err(AssertionError::NotLastInserted.into());
    }
    Ok(id)
}

/// Unwraps a unique lookup: zero rows is `NotFound`, more than one is an
/// assertion failure.
pub(crate) fn exactly_one<T>(
    rows: Vec<T>,
    entity: &'static str,
    key: impl Into<String>,
) -> Result<T, DatabaseError> {
    let got = rows.len();
    let mut rows = rows.into_iter();
    match (rows.next(), got) {
        (Some(row), 1) => Ok(row),
        (None, _) => Err(DatabaseError::NotFound {
            entity,
            key: key.into(),
        }),
        _ => Err(AssertionError::Rows { want: 1, got }.into()),
    }
}

/// `?N, ?N+1, ...` placeholders for an `IN (...)` list.
pub(crate) fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert_eq!(count, migrations::latest_version());
            Ok(())
        })
        .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.ends_with("synthjob.db"));
        assert!(path.to_string_lossy().contains(".synthjob"));
    }

    #[test]
    fn test_with_tx_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let ts = encode_time(&now());
        let result: Result<(), DatabaseError> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO objects (type, bucket, path, size_bytes, created_at, updated_at)
                 VALUES ('File', 'b', 'p', 1, ?1, ?1)",
                [&ts],
            )?;
            Err(AssertionError::NotLastInserted.into())
        });
        assert!(matches!(result, Err(DatabaseError::Assertion(_))));

        db.with_conn(|conn| {
            let count: u32 = conn.query_row("SELECT COUNT(*) FROM objects", [], |r| r.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_encoded_time_orders_lexically() {
        let earlier = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = DateTime::parse_from_rfc3339("2026-01-01T00:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let (a, b) = (encode_time(&earlier), encode_time(&later));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_exactly_one() {
        assert_eq!(exactly_one(vec![7], "thing", "k").unwrap(), 7);
        assert!(exactly_one(Vec::<i32>::new(), "thing", "k")
            .unwrap_err()
            .is_not_found());
        assert!(matches!(
            exactly_one(vec![1, 2], "thing", "k"),
            Err(DatabaseError::Assertion(AssertionError::Rows { want: 1, got: 2 }))
        ));
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1, 3), "?1, ?2, ?3");
        assert_eq!(placeholders(4, 1), "?4");
    }
}
