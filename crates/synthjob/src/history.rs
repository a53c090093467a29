//! Read side: status, listing, search and artifact download.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::process_repo::ListFilter;
use crate::db::search_repo::SearchFilter;
use crate::db::{Database, ProcessDetailsGetter, ProcessGetter, ProcessLister, ProcessSearcher};
use crate::domain::{ParseEnumError, Process, ProcessDetails, ProcessStatus};
use crate::error::HistoryError;
use crate::storage::{join_key, ObjectReader, StoredObject};

/// A job as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessView {
    pub rid: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub status: ProcessStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub score_object_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_object_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_object_id: Option<i64>,
}

impl ProcessView {
    pub fn new(process: &Process, details: &ProcessDetails) -> Self {
        Self {
            rid: process.request_id.clone(),
            title: details.title.clone(),
            command: details.command.clone(),
            status: process.status,
            created_at: process.created_at,
            started_at: process.started_at,
            completed_at: process.completed_at,
            score_object_id: details.score_object_id,
            log_object_id: details.log_object_id,
            result_object_id: details.result_object_id,
        }
    }
}

/// Downloadable artifacts of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Log,
    /// The executable's `config.yml`, served as JSON.
    Config,
    MusicXml,
    Wav,
    WorldWav,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Log => "log",
            ArtifactKind::Config => "config",
            ArtifactKind::MusicXml => "musicxml",
            ArtifactKind::Wav => "wav",
            ArtifactKind::WorldWav => "world_wav",
        }
    }

    fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Log => "text/plain",
            ArtifactKind::Config => "application/json",
            ArtifactKind::MusicXml => "application/vnd.recordare.musicxml+xml",
            ArtifactKind::Wav | ArtifactKind::WorldWav => "audio/wav",
        }
    }

    fn source(&self, title: &str) -> ArtifactSource {
        match self {
            ArtifactKind::Log => ArtifactSource::Log,
            ArtifactKind::MusicXml => ArtifactSource::Score,
            ArtifactKind::Config => ArtifactSource::Result("config.yml".to_string()),
            ArtifactKind::Wav => ArtifactSource::Result(format!("{}.wav", title)),
            ArtifactKind::WorldWav => ArtifactSource::Result(format!("{}_world.wav", title)),
        }
    }
}

/// Where an artifact's bytes are recorded.
enum ArtifactSource {
    Log,
    Score,
    /// A file inside the result directory.
    Result(String),
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(ArtifactKind::Log),
            "config" => Ok(ArtifactKind::Config),
            "musicxml" => Ok(ArtifactKind::MusicXml),
            "wav" => Ok(ArtifactKind::Wav),
            "world_wav" => Ok(ArtifactKind::WorldWav),
            other => Err(ParseEnumError {
                kind: "artifact kind",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

pub struct History {
    process_getter: Arc<dyn ProcessGetter>,
    process_lister: Arc<dyn ProcessLister>,
    details_getter: Arc<dyn ProcessDetailsGetter>,
    searcher: Arc<dyn ProcessSearcher>,
    objects: Arc<dyn ObjectReader>,
}

impl History {
    pub fn new(
        process_getter: Arc<dyn ProcessGetter>,
        process_lister: Arc<dyn ProcessLister>,
        details_getter: Arc<dyn ProcessDetailsGetter>,
        searcher: Arc<dyn ProcessSearcher>,
        objects: Arc<dyn ObjectReader>,
    ) -> Self {
        Self {
            process_getter,
            process_lister,
            details_getter,
            searcher,
            objects,
        }
    }

    pub fn with_database(db: &Database, objects: Arc<dyn ObjectReader>) -> Self {
        Self::new(
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            objects,
        )
    }

    fn load(&self, rid: &str) -> Result<(Process, ProcessDetails), HistoryError> {
        let process = self.process_getter.get_process_by_request_id(rid)?;
        let details = self.details_getter.get_details(process.details_id)?;
        Ok((process, details))
    }

    pub fn status(&self, rid: &str) -> Result<ProcessView, HistoryError> {
        let (process, details) = self.load(rid)?;
        Ok(ProcessView::new(&process, &details))
    }

    /// Most recent jobs, newest first.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<ProcessView>, HistoryError> {
        let processes = self.process_lister.list_processes(filter)?;
        let ids: Vec<i64> = processes.iter().map(|p| p.details_id).collect();
        let details: HashMap<i64, ProcessDetails> = self
            .details_getter
            .get_details_by_ids(&ids)?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();

        processes
            .iter()
            .map(|process| {
                details
                    .get(&process.details_id)
                    .map(|d| ProcessView::new(process, d))
                    .ok_or_else(|| HistoryError::NotFound {
                        rid: process.request_id.clone(),
                        what: "process details".to_string(),
                    })
            })
            .collect()
    }

    pub fn search(&self, filter: &SearchFilter) -> Result<Vec<ProcessView>, HistoryError> {
        Ok(self
            .searcher
            .search_processes(filter)?
            .iter()
            .map(|hit| ProcessView::new(&hit.process, &hit.details))
            .collect())
    }

    pub async fn artifact(&self, rid: &str, kind: ArtifactKind) -> Result<Artifact, HistoryError> {
        let (_, details) = self.load(rid)?;
        let not_found = || HistoryError::NotFound {
            rid: rid.to_string(),
            what: format!("{} artifact", kind),
        };

        let stored = match kind.source(&details.title) {
            ArtifactSource::Log => {
                let id = details.log_object_id.ok_or_else(not_found)?;
                self.objects.read_object(id).await?
            }
            ArtifactSource::Score => self.objects.read_object(details.score_object_id).await?,
            ArtifactSource::Result(name) => {
                let id = details.result_object_id.ok_or_else(not_found)?;
                let dir = self.objects.read_object(id).await?;
                let path = join_key([dir.object.path.as_str(), name.as_str()]);
                match self.objects.read_object_by_path(&dir.object.bucket, &path).await {
                    Ok(stored) => stored,
                    Err(e) if e.is_not_found() => return Err(not_found()),
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let (file_name, bytes) = read_stored(stored, not_found)?;
        match kind {
            ArtifactKind::Config => Ok(Artifact {
                file_name: "config.json".to_string(),
                content_type: kind.content_type(),
                bytes: yaml_to_json(&file_name, &bytes)?,
            }),
            _ => Ok(Artifact {
                file_name,
                content_type: kind.content_type(),
                bytes,
            }),
        }
    }
}

fn read_stored(
    stored: StoredObject,
    not_found: impl FnOnce() -> HistoryError,
) -> Result<(String, Vec<u8>), HistoryError> {
    let path = stored.object.path;
    let file_name = path.rsplit('/').next().unwrap_or(&path).to_string();
    let storage = stored.storage.ok_or_else(not_found)?;
    let bytes = storage
        .into_bytes()
        .map_err(|source| HistoryError::Read {
            path: path.clone(),
            source,
        })?;
    Ok((file_name, bytes))
}

fn yaml_to_json(path: &str, bytes: &[u8]) -> Result<Vec<u8>, HistoryError> {
    let convert = |reason: String| HistoryError::Convert {
        path: path.to_string(),
        reason,
    };
    let value: serde_json::Value =
        serde_yaml::from_slice(bytes).map_err(|e| convert(e.to_string()))?;
    serde_json::to_vec_pretty(&value).map_err(|e| convert(e.to_string()))
}
