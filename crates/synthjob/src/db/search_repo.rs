//! History search across processes and their details.

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;

use super::details_repo::{self, details_from_row};
use super::process_repo::{self, process_from_row, DEFAULT_LIST_LIMIT};
use super::{encode_time, Database, DatabaseError};
use crate::domain::{Process, ProcessDetails, ProcessStatus};

/// Search criteria. Every filter is optional; the creation-time range is
/// half-open: `created_from <= created_at < created_until`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub status: Option<ProcessStatus>,
    pub title_prefix: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// A process joined with its details.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub process: Process,
    pub details: ProcessDetails,
}

/// Runs a search, newest creation time first.
pub fn search(db: &Database, filter: &SearchFilter) -> Result<Vec<SearchHit>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            param_values.push(Box::new(status.as_str()));
            conditions.push(format!("p.status = ?{}", param_values.len()));
        }
        if let Some(ref prefix) = filter.title_prefix {
            param_values.push(Box::new(prefix.clone()));
            let n = param_values.len();
            conditions.push(format!("substr(d.title, 1, length(?{n})) = ?{n}"));
        }
        if let Some(ref from) = filter.created_from {
            param_values.push(Box::new(encode_time(from)));
            conditions.push(format!("p.created_at >= ?{}", param_values.len()));
        }
        if let Some(ref until) = filter.created_until {
            param_values.push(Box::new(encode_time(until)));
            conditions.push(format!("p.created_at < ?{}", param_values.len()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        param_values.push(Box::new(i64::from(
            filter.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )));
        let sql = format!(
            "SELECT {}, {} FROM processes p
             JOIN process_details d ON d.id = p.details_id
             {} ORDER BY p.created_at DESC, p.id DESC LIMIT ?{}",
            process_repo::PREFIXED_COLUMNS,
            details_repo::PREFIXED_COLUMNS,
            where_clause,
            param_values.len()
        );

        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok(SearchHit {
                    process: process_from_row(row, "p_")?,
                    details: details_from_row(row, "d_")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::details_repo::NewProcessDetails;
    use crate::db::object_repo::{self, NewObject};
    use crate::db::process_repo::{NewProcess, ProcessUpdate};
    use crate::domain::ObjectType;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    /// Inserts a job and pins its creation time.
    fn job(db: &Database, rid: &str, title: &str, created: &str) -> Process {
        let score = object_repo::insert(
            db,
            &NewObject {
                object_type: ObjectType::File,
                bucket: "synth".to_string(),
                path: format!("{}/score", rid),
                size_bytes: 1,
            },
        )
        .unwrap();
        let details = details_repo::insert(db, &NewProcessDetails::new(title, score.id)).unwrap();
        let process = process_repo::insert(db, &NewProcess::pending(rid, details.id)).unwrap();
        let created = encode_time(&at(created));
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE processes SET created_at = ?1 WHERE id = ?2",
                rusqlite::params![created, process.id],
            )?;
            Ok(())
        })
        .unwrap();
        process_repo::find_by_id(db, process.id).unwrap()
    }

    fn rids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.process.request_id.as_str()).collect()
    }

    #[test]
    fn test_search_half_open_range() {
        let db = test_db();
        job(&db, "before", "x", "2026-03-01T09:59:59.999999Z");
        job(&db, "start", "x", "2026-03-01T10:00:00Z");
        job(&db, "middle", "x", "2026-03-01T10:30:00Z");
        job(&db, "end", "x", "2026-03-01T11:00:00Z");

        let hits = search(
            &db,
            &SearchFilter {
                created_from: Some(at("2026-03-01T10:00:00Z")),
                created_until: Some(at("2026-03-01T11:00:00Z")),
                limit: Some(10),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(rids(&hits), vec!["middle", "start"]);
    }

    #[test]
    fn test_search_open_bounds() {
        let db = test_db();
        job(&db, "old", "x", "2026-01-01T00:00:00Z");
        job(&db, "new", "x", "2026-02-01T00:00:00Z");

        let since = search(
            &db,
            &SearchFilter {
                created_from: Some(at("2026-01-15T00:00:00Z")),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(rids(&since), vec!["new"]);

        let until = search(
            &db,
            &SearchFilter {
                created_until: Some(at("2026-01-15T00:00:00Z")),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(rids(&until), vec!["old"]);
    }

    #[test]
    fn test_search_title_prefix_is_exact() {
        let db = test_db();
        job(&db, "1", "song_a", "2026-01-01T00:00:01Z");
        job(&db, "2", "Song_b", "2026-01-01T00:00:02Z");
        job(&db, "3", "my_song", "2026-01-01T00:00:03Z");
        job(&db, "4", "song%", "2026-01-01T00:00:04Z");

        let hits = search(
            &db,
            &SearchFilter {
                title_prefix: Some("song".to_string()),
                limit: Some(10),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(rids(&hits), vec!["4", "1"]);

        let literal = search(
            &db,
            &SearchFilter {
                title_prefix: Some("song%".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(rids(&literal), vec!["4"]);
    }

    #[test]
    fn test_search_status_and_limit() {
        let db = test_db();
        for i in 0..8 {
            job(&db, &format!("p{}", i), "t", &format!("2026-01-01T00:00:0{}Z", i));
        }
        let running = job(&db, "r", "t", "2026-01-02T00:00:00Z");
        process_repo::update(
            &db,
            running.id,
            &ProcessUpdate::new().status(ProcessStatus::Running),
        )
        .unwrap();

        let pending = search(
            &db,
            &SearchFilter {
                status: Some(ProcessStatus::Pending),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pending.len(), DEFAULT_LIST_LIMIT as usize);
        assert_eq!(pending[0].process.request_id, "p7");
        assert!(pending.iter().all(|h| h.process.status == ProcessStatus::Pending));
        assert!(pending.iter().all(|h| h.details.id == h.process.details_id));
    }
}
