//! Process repository: one row per submitted job.

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row};

use super::{
    assert_one_affected, decode_opt_time, decode_time, encode_time, exactly_one,
    last_inserted_id, now, placeholders, Database, DatabaseError,
};
use crate::domain::{Process, ProcessStatus};

/// Default number of rows returned by [`list`].
pub const DEFAULT_LIST_LIMIT: u32 = 5;

pub(crate) const PREFIXED_COLUMNS: &str = "p.id AS p_id, p.request_id AS p_request_id, \
     p.status AS p_status, p.details_id AS p_details_id, p.started_at AS p_started_at, \
     p.completed_at AS p_completed_at, p.created_at AS p_created_at, \
     p.updated_at AS p_updated_at";

pub(crate) fn process_from_row(row: &Row<'_>, prefix: &str) -> Result<Process, rusqlite::Error> {
    let col = |name: &str| format!("{}{}", prefix, name);
    let status_col = col("status");
    let raw_status: String = row.get(status_col.as_str())?;
    let status = raw_status.parse::<ProcessStatus>().map_err(|e| {
        let idx = row
            .as_ref()
            .column_index(status_col.as_str())
            .unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Process {
        id: row.get(col("id").as_str())?,
        request_id: row.get(col("request_id").as_str())?,
        status,
        details_id: row.get(col("details_id").as_str())?,
        started_at: decode_opt_time(row, &col("started_at"))?,
        completed_at: decode_opt_time(row, &col("completed_at"))?,
        created_at: decode_time(row, &col("created_at"))?,
        updated_at: decode_time(row, &col("updated_at"))?,
    })
}

fn from_row(row: &Row<'_>) -> Result<Process, rusqlite::Error> {
    process_from_row(row, "")
}

/// Values for a new process row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProcess {
    pub request_id: String,
    pub status: ProcessStatus,
    pub details_id: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NewProcess {
    pub fn pending(request_id: impl Into<String>, details_id: i64) -> Self {
        Self {
            request_id: request_id.into(),
            status: ProcessStatus::Pending,
            details_id,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Set of fields to change on a process row. Fields left unset are not
/// written. `when_status` turns the update into a compare-and-set on the
/// current status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessUpdate {
    status: Option<ProcessStatus>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    expected_status: Option<ProcessStatus>,
}

impl ProcessUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: ProcessStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn when_status(mut self, status: ProcessStatus) -> Self {
        self.expected_status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.started_at.is_none() && self.completed_at.is_none()
    }
}

/// Query filter for [`list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub status: Option<ProcessStatus>,
    pub limit: Option<u32>,
}

/// Inserts a process row and returns it re-read from the database.
pub fn insert(db: &Database, new: &NewProcess) -> Result<Process, DatabaseError> {
    db.with_tx(|tx| {
        let ts = encode_time(&now());
        let affected = tx.execute(
            "INSERT INTO processes (request_id, status, details_id, started_at, completed_at,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                new.request_id,
                new.status.as_str(),
                new.details_id,
                new.started_at.as_ref().map(encode_time),
                new.completed_at.as_ref().map(encode_time),
                ts,
            ],
        )?;
        assert_one_affected(affected)?;
        let id = last_inserted_id(tx)?;
        select_by_id(tx, id)
    })
}

/// Applies a partial update and returns the refreshed row.
///
/// Without a status guard, an update that matches no row is an assertion
/// failure. With a guard, a row in another status yields `Conflict`.
pub fn update(db: &Database, id: i64, update: &ProcessUpdate) -> Result<Process, DatabaseError> {
    db.with_tx(|tx| {
        let mut sets = vec!["updated_at = ?1".to_string()];
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(encode_time(&now()))];

        if let Some(status) = update.status {
            values.push(Box::new(status.as_str()));
            sets.push(format!("status = ?{}", values.len()));
        }
        if let Some(ref at) = update.started_at {
            values.push(Box::new(encode_time(at)));
            sets.push(format!("started_at = ?{}", values.len()));
        }
        if let Some(ref at) = update.completed_at {
            values.push(Box::new(encode_time(at)));
            sets.push(format!("completed_at = ?{}", values.len()));
        }

        values.push(Box::new(id));
        let mut sql = format!(
            "UPDATE processes SET {} WHERE id = ?{}",
            sets.join(", "),
            values.len()
        );
        if let Some(expected) = update.expected_status {
            values.push(Box::new(expected.as_str()));
            sql.push_str(&format!(" AND status = ?{}", values.len()));
        }

        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let affected = tx.execute(&sql, params_ref.as_slice())?;

        if affected == 0 {
            if let Some(expected) = update.expected_status {
                let current = select_by_id(tx, id)?;
                return Err(DatabaseError::Conflict {
                    entity: "process",
                    key: current.request_id,
                    expected: expected.to_string(),
                    found: current.status.to_string(),
                });
            }
        }
        assert_one_affected(affected)?;
        select_by_id(tx, id)
    })
}

/// Finds a process by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Process, DatabaseError> {
    db.with_conn(|conn| select_by_id(conn, id))
}

/// Finds a process by its external request id.
pub fn find_by_request_id(db: &Database, request_id: &str) -> Result<Process, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM processes WHERE request_id = ?1")?;
        let rows = stmt
            .query_map(params![request_id], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        exactly_one(rows, "process", request_id)
    })
}

/// Finds all processes referencing one of the given details ids.
pub fn find_by_details_ids(
    db: &Database,
    details_ids: &[i64],
) -> Result<Vec<Process>, DatabaseError> {
    if details_ids.is_empty() {
        return Ok(Vec::new());
    }
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT * FROM processes WHERE details_id IN ({}) ORDER BY id DESC",
            placeholders(1, details_ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(details_ids.iter()), from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns the most recent processes, newest id first.
pub fn list(db: &Database, filter: &ListFilter) -> Result<Vec<Process>, DatabaseError> {
    let limit = i64::from(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT));
    db.with_conn(|conn| {
        let rows = match filter.status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM processes WHERE status = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![status.as_str(), limit], from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare("SELECT * FROM processes ORDER BY id DESC LIMIT ?1")?;
                let rows = stmt
                    .query_map(params![limit], from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    })
}

fn select_by_id(conn: &Connection, id: i64) -> Result<Process, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM processes WHERE id = ?1")?;
    let rows = stmt
        .query_map(params![id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    exactly_one(rows, "process", id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::details_repo::{self, NewProcessDetails};
    use crate::db::object_repo::{self, NewObject};
    use crate::domain::ObjectType;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_details(db: &Database, name: &str) -> i64 {
        let score = object_repo::insert(
            db,
            &NewObject {
                object_type: ObjectType::File,
                bucket: "synth".to_string(),
                path: format!("{}/score.musicxml", name),
                size_bytes: 10,
            },
        )
        .unwrap();
        details_repo::insert(db, &NewProcessDetails::new(name, score.id))
            .unwrap()
            .id
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let details_id = sample_details(&db, "rid-1");
        let created = insert(&db, &NewProcess::pending("rid-1", details_id)).unwrap();

        assert_eq!(created.status, ProcessStatus::Pending);
        assert!(created.started_at.is_none());
        assert!(created.completed_at.is_none());
        assert_eq!(created.created_at, created.updated_at);

        assert_eq!(find_by_id(&db, created.id).unwrap(), created);
        assert_eq!(find_by_request_id(&db, "rid-1").unwrap(), created);
    }

    #[test]
    fn test_find_missing_request_id() {
        let db = test_db();
        let err = find_by_request_id(&db, "missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_partial_update_changes_only_supplied_fields() {
        let db = test_db();
        let details_id = sample_details(&db, "rid-2");
        let created = insert(&db, &NewProcess::pending("rid-2", details_id)).unwrap();

        let started = now();
        let running = update(
            &db,
            created.id,
            &ProcessUpdate::new()
                .status(ProcessStatus::Running)
                .started_at(started),
        )
        .unwrap();
        assert_eq!(running.status, ProcessStatus::Running);
        assert_eq!(running.started_at, Some(started));
        assert!(running.completed_at.is_none());
        assert_eq!(running.request_id, "rid-2");
        assert_eq!(running.created_at, created.created_at);

        let completed = now();
        let done = update(&db, created.id, &ProcessUpdate::new().completed_at(completed)).unwrap();
        assert_eq!(done.status, ProcessStatus::Running);
        assert_eq!(done.started_at, Some(started));
        assert_eq!(done.completed_at, Some(completed));
    }

    #[test]
    fn test_guarded_update_conflicts() {
        let db = test_db();
        let details_id = sample_details(&db, "rid-3");
        let created = insert(&db, &NewProcess::pending("rid-3", details_id)).unwrap();

        let start = ProcessUpdate::new()
            .status(ProcessStatus::Running)
            .started_at(now())
            .when_status(ProcessStatus::Pending);
        update(&db, created.id, &start).unwrap();

        let err = update(&db, created.id, &start).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            find_by_id(&db, created.id).unwrap().status,
            ProcessStatus::Running
        );
    }

    #[test]
    fn test_update_missing_row_is_assertion() {
        let db = test_db();
        let err = update(&db, 404, &ProcessUpdate::new().status(ProcessStatus::Failed)).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Assertion(crate::db::AssertionError::RowsAffected { want: 1, got: 0 })
        ));
    }

    #[test]
    fn test_find_by_details_ids() {
        let db = test_db();
        let d1 = sample_details(&db, "a");
        let d2 = sample_details(&db, "b");
        let d3 = sample_details(&db, "c");
        insert(&db, &NewProcess::pending("a", d1)).unwrap();
        insert(&db, &NewProcess::pending("b", d2)).unwrap();
        insert(&db, &NewProcess::pending("c", d3)).unwrap();

        let found = find_by_details_ids(&db, &[d1, d3]).unwrap();
        let rids: Vec<_> = found.iter().map(|p| p.request_id.as_str()).collect();
        assert_eq!(rids, vec!["c", "a"]);
        assert!(find_by_details_ids(&db, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_list_latest_with_default_limit() {
        let db = test_db();
        for i in 0..7 {
            let rid = format!("rid-{}", i);
            let details_id = sample_details(&db, &rid);
            insert(&db, &NewProcess::pending(rid, details_id)).unwrap();
        }

        let rows = list(&db, &ListFilter::default()).unwrap();
        assert_eq!(rows.len(), DEFAULT_LIST_LIMIT as usize);
        assert_eq!(rows[0].request_id, "rid-6");
        assert_eq!(rows[4].request_id, "rid-2");
    }

    #[test]
    fn test_list_with_status_filter() {
        let db = test_db();
        let d1 = sample_details(&db, "p");
        let d2 = sample_details(&db, "r");
        insert(&db, &NewProcess::pending("p", d1)).unwrap();
        let r = insert(&db, &NewProcess::pending("r", d2)).unwrap();
        update(&db, r.id, &ProcessUpdate::new().status(ProcessStatus::Running)).unwrap();

        let running = list(
            &db,
            &ListFilter {
                status: Some(ProcessStatus::Running),
                limit: Some(10),
            },
        )
        .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].request_id, "r");
    }
}
