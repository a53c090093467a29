//! Durable task queue table.
//!
//! A task moves `queued -> leased -> done`, or back to `queued` on retry,
//! or to `dead` once its retries are exhausted. An expired lease makes a
//! task claimable again, which gives at-least-once delivery.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{assert_one_affected, decode_opt_time, decode_time, encode_time, last_inserted_id};
use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub id: i64,
    pub kind: String,
    pub payload: String,
    pub state: String,
    pub attempts: u32,
    pub max_retry: u32,
    pub available_at: DateTime<Utc>,
    pub lease_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind: row.get("kind")?,
            payload: row.get("payload")?,
            state: row.get("state")?,
            attempts: row.get("attempts")?,
            max_retry: row.get("max_retry")?,
            available_at: decode_time(row, "available_at")?,
            lease_until: decode_opt_time(row, "lease_until")?,
            last_error: row.get("last_error")?,
        })
    }
}

/// Inserts a queued task and returns its id.
pub fn enqueue(
    db: &Database,
    kind: &str,
    payload: &str,
    max_retry: u32,
    now: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    db.with_tx(|tx| {
        let ts = encode_time(&now);
        let affected = tx.execute(
            "INSERT INTO queue_tasks (kind, payload, state, attempts, max_retry, available_at,
             created_at, updated_at)
             VALUES (?1, ?2, 'queued', 0, ?3, ?4, ?4, ?4)",
            params![kind, payload, max_retry, ts],
        )?;
        assert_one_affected(affected)?;
        last_inserted_id(tx)
    })
}

/// Claims the oldest available task of `kind`, leasing it until
/// `lease_until`. Queued tasks whose `available_at` has passed and leased
/// tasks whose lease expired are both claimable.
pub fn claim_next(
    db: &Database,
    kind: &str,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
) -> Result<Option<QueueRow>, DatabaseError> {
    db.with_tx(|tx| {
        let now_ts = encode_time(&now);
        let candidate = {
            let mut stmt = tx.prepare(
                "SELECT * FROM queue_tasks
                 WHERE kind = ?1
                   AND ((state = 'queued' AND available_at <= ?2)
                     OR (state = 'leased' AND lease_until <= ?2))
                 ORDER BY available_at, id
                 LIMIT 1",
            )?;
            let mut rows = stmt.query_map(params![kind, now_ts], QueueRow::from_row)?;
            let next = rows.next().transpose()?;
            next
        };

        let Some(task) = candidate else {
            return Ok(None);
        };

        let affected = tx.execute(
            "UPDATE queue_tasks SET state = 'leased', lease_until = ?2, attempts = attempts + 1,
             updated_at = ?3 WHERE id = ?1",
            params![task.id, encode_time(&lease_until), now_ts],
        )?;
        assert_one_affected(affected)?;

        Ok(Some(QueueRow {
            state: "leased".to_string(),
            attempts: task.attempts + 1,
            lease_until: Some(lease_until),
            ..task
        }))
    })
}

/// Marks a task as finished.
pub fn complete(db: &Database, id: i64, now: DateTime<Utc>) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        let affected = tx.execute(
            "UPDATE queue_tasks SET state = 'done', lease_until = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id, encode_time(&now)],
        )?;
        assert_one_affected(affected)
    })
}

/// Puts a task back in the queue, available again at `available_at`.
pub fn reschedule(
    db: &Database,
    id: i64,
    available_at: DateTime<Utc>,
    error: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        let affected = tx.execute(
            "UPDATE queue_tasks SET state = 'queued', available_at = ?2, lease_until = NULL,
             last_error = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, encode_time(&available_at), error, encode_time(&now)],
        )?;
        assert_one_affected(affected)
    })
}

/// Parks a task that exhausted its retries.
pub fn bury(db: &Database, id: i64, error: &str, now: DateTime<Utc>) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        let affected = tx.execute(
            "UPDATE queue_tasks SET state = 'dead', lease_until = NULL, last_error = ?2,
             updated_at = ?3 WHERE id = ?1",
            params![id, error, encode_time(&now)],
        )?;
        assert_one_affected(affected)
    })
}

/// Finds a task by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<QueueRow, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM queue_tasks WHERE id = ?1")?;
        let rows = stmt
            .query_map(params![id], QueueRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        super::exactly_one(rows, "queue task", id.to_string())
    })
}

/// Counts tasks in the given state.
pub fn count_by_state(db: &Database, state: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_tasks WHERE state = ?1",
            params![state],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
