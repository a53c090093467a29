//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// No row matched a lookup that must resolve to exactly one row.
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    /// A repository invariant did not hold; the transaction was rolled back.
    #[error("Assertion failed: {0}")]
    Assertion(#[from] AssertionError),

    /// A guarded write found the row in another state than required.
    #[error("{entity} '{key}' conflict: expected {expected}, found {found}")]
    Conflict {
        entity: &'static str,
        key: String,
        expected: String,
        found: String,
    },

    #[error("Unknown object type '{0}'")]
    UnknownObjectType(String),

    #[error("Invalid value '{value}' in column '{column}'")]
    InvalidValue { column: &'static str, value: String },

    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DatabaseError::Conflict { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssertionError {
    #[error("expected {want} affected row(s), got {got}")]
    RowsAffected { want: usize, got: usize },

    #[error("insert did not produce a row id")]
    NotLastInserted,

    #[error("expected {want} matching row(s), got {got}")]
    Rows { want: usize, got: usize },
}
