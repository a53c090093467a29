//! Object repository: metadata rows for stored files and directory markers.

use rusqlite::{params, Connection, Row};

use super::{
    assert_one_affected, decode_time, encode_time, exactly_one, last_inserted_id, now, Database,
    DatabaseError,
};
use crate::domain::{Object, ObjectType};

/// A raw object row. The type column is kept as text so an unexpected value
/// surfaces as `UnknownObjectType` instead of a conversion failure.
#[derive(Debug, Clone)]
struct ObjectRow {
    id: i64,
    object_type: String,
    bucket: String,
    path: String,
    size_bytes: i64,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl ObjectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            object_type: row.get("type")?,
            bucket: row.get("bucket")?,
            path: row.get("path")?,
            size_bytes: row.get("size_bytes")?,
            created_at: decode_time(row, "created_at")?,
            updated_at: decode_time(row, "updated_at")?,
        })
    }

    fn into_object(self) -> Result<Object, DatabaseError> {
        let object_type = self
            .object_type
            .parse::<ObjectType>()
            .map_err(|_| DatabaseError::UnknownObjectType(self.object_type.clone()))?;
        Ok(Object {
            id: self.id,
            object_type,
            bucket: self.bucket,
            path: self.path,
            size_bytes: u64::try_from(self.size_bytes).map_err(|_| {
                DatabaseError::InvalidValue {
                    column: "size_bytes",
                    value: self.size_bytes.to_string(),
                }
            })?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Values for a new object row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObject {
    pub object_type: ObjectType,
    pub bucket: String,
    pub path: String,
    pub size_bytes: u64,
}

/// Inserts an object row and returns it as stored.
pub fn insert(db: &Database, new: &NewObject) -> Result<Object, DatabaseError> {
    db.with_tx(|tx| {
        let ts = encode_time(&now());
        let size = i64::try_from(new.size_bytes).map_err(|_| DatabaseError::InvalidValue {
            column: "size_bytes",
            value: new.size_bytes.to_string(),
        })?;
        let affected = tx.execute(
            "INSERT INTO objects (type, bucket, path, size_bytes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![new.object_type.as_str(), new.bucket, new.path, size, ts],
        )?;
        assert_one_affected(affected)?;
        let id = last_inserted_id(tx)?;
        select_by_id(tx, id)
    })
}

/// Finds an object by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Object, DatabaseError> {
    db.with_conn(|conn| select_by_id(conn, id))
}

/// Finds an object by its (bucket, path) address.
pub fn find_by_path(db: &Database, bucket: &str, path: &str) -> Result<Object, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM objects WHERE bucket = ?1 AND path = ?2")?;
        let rows = stmt
            .query_map(params![bucket, path], ObjectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        exactly_one(rows, "object", format!("{}/{}", bucket, path))?.into_object()
    })
}

fn select_by_id(conn: &Connection, id: i64) -> Result<Object, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM objects WHERE id = ?1")?;
    let rows = stmt
        .query_map(params![id], ObjectRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    exactly_one(rows, "object", id.to_string())?.into_object()
}
