use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue kind of [`StartTask`].
pub const START_TASK_KIND: &str = "synth:start";

/// Work item asking a worker to run one job attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTask {
    pub rid: String,
    /// Synthesis parameters as `--key value` pairs.
    #[serde(default)]
    pub args: Vec<String>,
    /// Latest instant an attempt may start. Bounds the time spent queued,
    /// not the attempt itself.
    #[serde(alias = "deadline")]
    pub expires_at: DateTime<Utc>,
}

impl StartTask {
    pub fn new(rid: impl Into<String>, args: Vec<String>, max_queue_wait: Duration) -> Self {
        let wait = chrono::Duration::from_std(max_queue_wait).unwrap_or(chrono::Duration::MAX);
        Self {
            rid: rid.into(),
            args,
            expires_at: Utc::now()
                .checked_add_signed(wait)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trip() {
        let task = StartTask::new("rid-1", vec!["--model".into(), "KIRITAN".into()], Duration::from_secs(60));
        let json = serde_json::to_string(&task).unwrap();
        let back: StartTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_expiry() {
        let task = StartTask::new("rid", Vec::new(), Duration::from_secs(100));
        assert!(!task.is_expired(Utc::now()));
        assert!(task.is_expired(task.expires_at));
        assert!(task.is_expired(task.expires_at + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_older_payload_still_decodes() {
        let task: StartTask =
            serde_json::from_str(r#"{"rid":"r","deadline":"2026-01-01T00:00:00Z"}"#).unwrap();
        assert!(task.args.is_empty());
        assert_eq!(task.expires_at.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }
}
