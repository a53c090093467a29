//! Process details repository: mutable execution metadata of a job.

use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row};

use super::{
    assert_one_affected, decode_time, encode_time, exactly_one, last_inserted_id, now,
    placeholders, Database, DatabaseError,
};
use crate::domain::ProcessDetails;

pub(crate) const PREFIXED_COLUMNS: &str = "d.id AS d_id, d.command AS d_command, \
     d.title AS d_title, d.score_object_id AS d_score_object_id, \
     d.log_object_id AS d_log_object_id, d.result_object_id AS d_result_object_id, \
     d.created_at AS d_created_at, d.updated_at AS d_updated_at";

pub(crate) fn details_from_row(
    row: &Row<'_>,
    prefix: &str,
) -> Result<ProcessDetails, rusqlite::Error> {
    let col = |name: &str| format!("{}{}", prefix, name);
    Ok(ProcessDetails {
        id: row.get(col("id").as_str())?,
        command: row.get(col("command").as_str())?,
        title: row.get(col("title").as_str())?,
        score_object_id: row.get(col("score_object_id").as_str())?,
        log_object_id: row.get(col("log_object_id").as_str())?,
        result_object_id: row.get(col("result_object_id").as_str())?,
        created_at: decode_time(row, &col("created_at"))?,
        updated_at: decode_time(row, &col("updated_at"))?,
    })
}

fn from_row(row: &Row<'_>) -> Result<ProcessDetails, rusqlite::Error> {
    details_from_row(row, "")
}

/// Values for a new details row. The score object is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProcessDetails {
    pub title: String,
    pub score_object_id: i64,
    pub command: Option<String>,
}

impl NewProcessDetails {
    pub fn new(title: impl Into<String>, score_object_id: i64) -> Self {
        Self {
            title: title.into(),
            score_object_id,
            command: None,
        }
    }
}

/// Set of fields to change on a details row. Artifact references may be
/// recorded once; replacing a recorded reference with another one is a
/// conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailsUpdate {
    command: Option<String>,
    log_object_id: Option<i64>,
    result_object_id: Option<i64>,
}

impl DetailsUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn log_object_id(mut self, id: i64) -> Self {
        self.log_object_id = Some(id);
        self
    }

    pub fn result_object_id(mut self, id: i64) -> Self {
        self.result_object_id = Some(id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.command.is_none() && self.log_object_id.is_none() && self.result_object_id.is_none()
    }
}

/// Inserts a details row and returns it as stored.
pub fn insert(db: &Database, new: &NewProcessDetails) -> Result<ProcessDetails, DatabaseError> {
    db.with_tx(|tx| {
        let ts = encode_time(&now());
        let affected = tx.execute(
            "INSERT INTO process_details (command, title, score_object_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![new.command, new.title, new.score_object_id, ts],
        )?;
        assert_one_affected(affected)?;
        let id = last_inserted_id(tx)?;
        select_by_id(tx, id)
    })
}

/// Applies a partial update and returns the refreshed row.
pub fn update(
    db: &Database,
    id: i64,
    update: &DetailsUpdate,
) -> Result<ProcessDetails, DatabaseError> {
    db.with_tx(|tx| {
        let current = select_by_id(tx, id)?;
        check_set_once("log_object_id", id, current.log_object_id, update.log_object_id)?;
        check_set_once(
            "result_object_id",
            id,
            current.result_object_id,
            update.result_object_id,
        )?;

        let mut sets = vec!["updated_at = ?1".to_string()];
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(encode_time(&now()))];

        if let Some(ref command) = update.command {
            values.push(Box::new(command.clone()));
            sets.push(format!("command = ?{}", values.len()));
        }
        if let Some(log_id) = update.log_object_id {
            values.push(Box::new(log_id));
            sets.push(format!("log_object_id = ?{}", values.len()));
        }
        if let Some(result_id) = update.result_object_id {
            values.push(Box::new(result_id));
            sets.push(format!("result_object_id = ?{}", values.len()));
        }

        values.push(Box::new(id));
        let sql = format!(
            "UPDATE process_details SET {} WHERE id = ?{}",
            sets.join(", "),
            values.len()
        );
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let affected = tx.execute(&sql, params_ref.as_slice())?;
        assert_one_affected(affected)?;
        select_by_id(tx, id)
    })
}

fn check_set_once(
    column: &'static str,
    id: i64,
    current: Option<i64>,
    next: Option<i64>,
) -> Result<(), DatabaseError> {
    match (current, next) {
        (Some(existing), Some(new)) if existing != new => Err(DatabaseError::Conflict {
            entity: "process_details",
            key: id.to_string(),
            expected: format!("{} unset", column),
            found: existing.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Finds a details row by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<ProcessDetails, DatabaseError> {
    db.with_conn(|conn| select_by_id(conn, id))
}

/// Finds all details rows with one of the given ids, in ascending id order.
pub fn find_by_ids(db: &Database, ids: &[i64]) -> Result<Vec<ProcessDetails>, DatabaseError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT * FROM process_details WHERE id IN ({}) ORDER BY id",
            placeholders(1, ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

fn select_by_id(conn: &Connection, id: i64) -> Result<ProcessDetails, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM process_details WHERE id = ?1")?;
    let rows = stmt
        .query_map(params![id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    exactly_one(rows, "process details", id.to_string())
}
