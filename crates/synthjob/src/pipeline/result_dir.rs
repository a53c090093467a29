//! Layout of the directory the executable writes its results into.
//!
//! Results land in exactly one subdirectory of `<workDir>/result/`, named
//! `BASENAME__YYYYMMDDhhmmss_<unixSeconds>_<salt>`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use super::error::ResultDirError;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

static RE_ELEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)__([0-9]{14})_([0-9]+)_([0-9]+)$").unwrap());

/// Parsed name of a result subdirectory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultElement {
    pub basename: String,
    pub created_at: DateTime<Utc>,
    pub unix_seconds: i64,
    pub salt: String,
}

impl ResultElement {
    pub fn new(basename: impl Into<String>, created_at: DateTime<Utc>, salt: u32) -> Self {
        Self {
            basename: basename.into(),
            created_at,
            unix_seconds: created_at.timestamp(),
            salt: salt.to_string(),
        }
    }
}

impl fmt::Display for ResultElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}__{}_{}_{}",
            self.basename,
            self.created_at.format(TIMESTAMP_FORMAT),
            self.unix_seconds,
            self.salt
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a result element name")]
pub struct ParseResultElementError(pub String);

impl FromStr for ResultElement {
    type Err = ParseResultElementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseResultElementError(s.to_string());
        let caps = RE_ELEMENT.captures(s).ok_or_else(invalid)?;

        let created_at = NaiveDateTime::parse_from_str(&caps[2], TIMESTAMP_FORMAT)
            .map_err(|_| invalid())?
            .and_utc();
        let unix_seconds = caps[3].parse::<i64>().map_err(|_| invalid())?;

        Ok(Self {
            basename: caps[1].to_string(),
            created_at,
            unix_seconds,
            salt: caps[4].to_string(),
        })
    }
}

/// The result subdirectory found after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultDir {
    pub path: PathBuf,
    pub name: String,
    pub element: Option<ResultElement>,
}

impl ResultDir {
    /// Non-directory entries directly inside the directory, sorted by
    /// name. Symlinks are followed; a dangling one is kept so that reading
    /// it reports the failure.
    pub fn files(&self) -> Result<Vec<PathBuf>, ResultDirError> {
        let read_err = |source| ResultDirError::Read {
            path: self.path.clone(),
            source,
        };
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.path).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            match std::fs::metadata(&path) {
                Ok(metadata) if metadata.is_dir() => {}
                Ok(_) => files.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => files.push(path),
                Err(e) => return Err(read_err(e)),
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Locates the single subdirectory of `result_root`.
pub fn find_result_dir(result_root: &Path) -> Result<ResultDir, ResultDirError> {
    let entries = match std::fs::read_dir(result_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ResultDirError::Missing(result_root.to_path_buf()));
        }
        Err(e) => {
            return Err(ResultDirError::Read {
                path: result_root.to_path_buf(),
                source: e,
            })
        }
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ResultDirError::Read {
            path: result_root.to_path_buf(),
            source: e,
        })?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            dirs.push(entry.path());
        }
    }

    match dirs.len() {
        0 => Err(ResultDirError::Missing(result_root.to_path_buf())),
        1 => {
            let path = dirs.remove(0);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let element = name.parse::<ResultElement>().ok();
            if element.is_none() {
                tracing::warn!(name = %name, "Result directory name does not follow the element format");
            }
            Ok(ResultDir {
                path,
                name,
                element,
            })
        }
        count => Err(ResultDirError::Ambiguous {
            path: result_root.to_path_buf(),
            count,
        }),
    }
}
