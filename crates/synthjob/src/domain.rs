//! Entities tracked by the repository.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle of a submitted job. The only legal transitions are
/// `Pending -> Running -> Succeed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Pending,
    Running,
    Succeed,
    Failed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Pending => "pending",
            ProcessStatus::Running => "running",
            ProcessStatus::Succeed => "succeed",
            ProcessStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessStatus::Succeed | ProcessStatus::Failed)
    }

    pub fn can_transition_to(&self, next: ProcessStatus) -> bool {
        matches!(
            (self, next),
            (ProcessStatus::Pending, ProcessStatus::Running)
                | (ProcessStatus::Running, ProcessStatus::Succeed)
                | (ProcessStatus::Running, ProcessStatus::Failed)
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessStatus::Pending),
            "running" => Ok(ProcessStatus::Running),
            "succeed" => Ok(ProcessStatus::Succeed),
            "failed" => Ok(ProcessStatus::Failed),
            other => Err(ParseEnumError {
                kind: "process status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    File,
    Dir,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::File => "File",
            ObjectType::Dir => "Dir",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "File" => Ok(ObjectType::File),
            "Dir" => Ok(ObjectType::Dir),
            other => Err(ParseEnumError {
                kind: "object type",
                value: other.to_string(),
            }),
        }
    }
}

/// One submitted job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Process {
    pub id: i64,
    pub request_id: String,
    pub status: ProcessStatus,
    pub details_id: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutable execution metadata of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessDetails {
    pub id: i64,
    pub command: Option<String>,
    pub title: String,
    pub score_object_id: i64,
    pub log_object_id: Option<i64>,
    pub result_object_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata of a stored file or directory marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Object {
    pub id: i64,
    pub object_type: ObjectType,
    pub bucket: String,
    pub path: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            ProcessStatus::Pending,
            ProcessStatus::Running,
            ProcessStatus::Succeed,
            ProcessStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ProcessStatus>().unwrap(), status);
        }
        assert!("done".parse::<ProcessStatus>().is_err());
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        use ProcessStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeed));
        assert!(Running.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Succeed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Succeed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ProcessStatus::Succeed).unwrap();
        assert_eq!(json, "\"succeed\"");
    }

    #[test]
    fn test_object_type_parse() {
        assert_eq!("File".parse::<ObjectType>().unwrap(), ObjectType::File);
        assert_eq!("Dir".parse::<ObjectType>().unwrap(), ObjectType::Dir);
        let err = "Link".parse::<ObjectType>().unwrap_err();
        assert_eq!(err.value, "Link");
    }
}
