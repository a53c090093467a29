use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::error::JobError;
use crate::storage::join_key;

pub const LOG_FILE_NAME: &str = "process.log";
pub const SCORE_DIR_NAME: &str = "score";
pub const RESULT_DIR_NAME: &str = "result";

// The score, the log and the results each get their own name under a job,
// both in the object store and in the working directory, so a score file
// can never shadow the log or a result file.

/// Object key of the submitted score, `<base>/<rid>/score/<file>`.
pub fn score_key(base_path: &str, rid: &str, file_name: &str) -> String {
    join_key([base_path, rid, SCORE_DIR_NAME, file_name])
}

/// Object key of the captured log, `<base>/<rid>/process.log`.
pub fn log_key(base_path: &str, rid: &str) -> String {
    join_key([base_path, rid, LOG_FILE_NAME])
}

/// Object key of the result directory, `<base>/<rid>/result`.
pub fn result_key(base_path: &str, rid: &str) -> String {
    join_key([base_path, rid, RESULT_DIR_NAME])
}

/// Working directory of one job attempt, `<work_dir>/<rid>-<suffix>`.
///
/// The suffix keeps concurrent deliveries of the same request from sharing
/// a directory.
#[derive(Debug, Clone)]
pub struct JobContext {
    rid: String,
    dir: PathBuf,
}

impl JobContext {
    pub fn create(work_root: &Path, rid: &str) -> Result<Self, JobError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let dir = work_root.join(format!("{}-{}", rid, &suffix[..8]));
        std::fs::create_dir_all(&dir).map_err(|e| JobError::local_io(&dir, e))?;
        Ok(Self {
            rid: rid.to_string(),
            dir,
        })
    }

    pub fn rid(&self) -> &str {
        &self.rid
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    /// Directory the executable writes its result subdirectory into.
    pub fn result_root(&self) -> PathBuf {
        self.dir.join(RESULT_DIR_NAME)
    }

    pub fn score_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(SCORE_DIR_NAME).join(file_name)
    }

    /// Creates the score directory and writes the score into it.
    pub async fn stage_score(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, JobError> {
        let path = self.score_path(file_name);
        let parent = self.dir.join(SCORE_DIR_NAME);
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| JobError::local_io(&parent, e))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| JobError::local_io(&path, e))?;
        Ok(path)
    }

    pub fn remove(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to remove job directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_remove() {
        let root = TempDir::new().unwrap();
        let ctx = JobContext::create(root.path(), "rid-1").unwrap();

        assert!(ctx.dir().is_dir());
        assert!(ctx
            .dir()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("rid-1-"));
        assert_eq!(ctx.log_path(), ctx.dir().join("process.log"));
        assert_eq!(ctx.result_root(), ctx.dir().join("result"));
        assert_eq!(ctx.score_path("a.musicxml"), ctx.dir().join("score/a.musicxml"));

        ctx.remove();
        assert!(!ctx.dir().exists());
    }

    #[tokio::test]
    async fn test_score_named_like_log_is_staged_apart() {
        let root = TempDir::new().unwrap();
        let ctx = JobContext::create(root.path(), "rid").unwrap();

        let staged = ctx.stage_score(LOG_FILE_NAME, b"<score/>").await.unwrap();
        assert_ne!(staged, ctx.log_path());
        assert_eq!(std::fs::read(&staged).unwrap(), b"<score/>");
        assert!(!ctx.log_path().exists());
    }

    #[test]
    fn test_keys_do_not_overlap() {
        assert_eq!(score_key("jobs", "rid", "song.musicxml"), "jobs/rid/score/song.musicxml");
        assert_eq!(score_key("jobs", "rid", "process.log"), "jobs/rid/score/process.log");
        assert_eq!(log_key("jobs", "rid"), "jobs/rid/process.log");
        assert_eq!(result_key("", "rid"), "rid/result");
    }

    #[test]
    fn test_same_rid_gets_distinct_dirs() {
        let root = TempDir::new().unwrap();
        let a = JobContext::create(root.path(), "rid").unwrap();
        let b = JobContext::create(root.path(), "rid").unwrap();
        assert_ne!(a.dir(), b.dir());
    }
}
