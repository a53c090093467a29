use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;

pub struct ProcessorConfig {
    pub executable: PathBuf,
    pub work_dir: PathBuf,
    pub bucket: String,
    pub base_path: String,
    pub env: BTreeMap<String, String>,
    pub extra_args: Vec<String>,
    pub process_timeout: Duration,
    /// Leave job working directories in place after the attempt.
    pub keep_work_dir: bool,
}

impl ProcessorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            executable: config.worker.executable.clone(),
            work_dir: config.worker.work_dir.clone(),
            bucket: config.storage.bucket.clone(),
            base_path: config.storage.base_path.clone(),
            env: config.worker.child_env(),
            extra_args: config.worker.extra_args.clone(),
            process_timeout: config.worker.process_timeout(),
            keep_work_dir: false,
        }
    }
}
