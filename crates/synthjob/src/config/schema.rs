use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; falls back to `~/.synthjob/data/synthjob.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolve_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Filesystem,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Root directory of the filesystem backend.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Key prefix under which every job's objects are stored.
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint of an S3-compatible service.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_root_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".synthjob").join("objects"))
        .unwrap_or_else(|| PathBuf::from("objects"))
}

fn default_bucket() -> String {
    "synthjob".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Filesystem,
            root_dir: default_root_dir(),
            bucket: default_bucket(),
            base_path: String::new(),
            region: None,
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// External synthesis executable.
    pub executable: PathBuf,
    /// Parent of the per-job working directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Jobs run at once. In local mode 0 means no limit.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Limit of one attempt, counted from when it starts.
    #[serde(default = "default_process_timeout_secs")]
    pub process_timeout_secs: u64,
    /// How long a queued task may wait for its first attempt before it is
    /// dropped.
    #[serde(default = "default_max_queue_wait_secs")]
    pub max_queue_wait_secs: u64,
    /// Variables set in the child environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Host variables copied into the child environment.
    #[serde(default = "default_pass_env")]
    pub pass_env: Vec<String>,
    /// Arguments appended after the fixed ones, e.g. `["--shell", "bash"]`.
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_enqueue_timeout_secs")]
    pub enqueue_timeout_secs: u64,
    #[serde(default = "default_max_score_bytes")]
    pub max_score_bytes: usize,
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("synthjob")
}

fn default_concurrency() -> usize {
    1
}

fn default_process_timeout_secs() -> u64 {
    1200
}

fn default_max_queue_wait_secs() -> u64 {
    24 * 60 * 60
}

fn default_pass_env() -> Vec<String> {
    vec!["HOME".to_string(), "PATH".to_string()]
}

fn default_max_retry() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_enqueue_timeout_secs() -> u64 {
    10
}

fn default_max_score_bytes() -> usize {
    1 << 20
}

impl WorkerConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            work_dir: default_work_dir(),
            concurrency: default_concurrency(),
            process_timeout_secs: default_process_timeout_secs(),
            max_queue_wait_secs: default_max_queue_wait_secs(),
            env: BTreeMap::new(),
            pass_env: default_pass_env(),
            extra_args: Vec::new(),
            max_retry: default_max_retry(),
            poll_interval_ms: default_poll_interval_ms(),
            enqueue_timeout_secs: default_enqueue_timeout_secs(),
            max_score_bytes: default_max_score_bytes(),
        }
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    pub fn max_queue_wait(&self) -> Duration {
        Duration::from_secs(self.max_queue_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_secs(self.enqueue_timeout_secs)
    }

    /// Child environment: the passed-through host variables overlaid with
    /// the explicit ones.
    pub fn child_env(&self) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = self
            .pass_env
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.clone(), value)))
            .collect();
        env.extend(self.env.clone());
        env
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Completion webhook; no notifications when unset.
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_notify_timeout_secs() -> u64 {
    10
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook: None,
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub json: bool,
    /// `EnvFilter` directives; overrides `debug` when set.
    #[serde(default)]
    pub filter: Option<String>,
}
