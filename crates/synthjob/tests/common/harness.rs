//! Test harness for isolated test execution.
//!
//! The `TestHarness` struct provides a complete isolated environment for
//! running jobs end to end: an in-memory database, a filesystem object
//! store and a work directory, all under one temporary directory.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use synthjob::db::{details_repo, object_repo, process_repo};
use synthjob::dispatch::{SubmitterConfig, TaskQueue};
use synthjob::notify::NoopNotifier;
use synthjob::pipeline::Collaborators;
use synthjob::storage::{FileSystemStore, ObjectStore};
use synthjob::{
    Database, History, Object, ObjectAdmin, Process, ProcessDetails, Processor, ProcessorConfig,
    Submitter,
};

pub const BUCKET: &str = "synth";
pub const BASE_PATH: &str = "jobs";

pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub objects: Arc<ObjectAdmin>,
    /// Root of the filesystem object store.
    pub store_dir: PathBuf,
    /// Parent of the per-job working directories.
    pub work_dir: PathBuf,
    bin_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let store_dir = base.join("store");
        let work_dir = base.join("work");
        let bin_dir = base.join("bin");
        for dir in [&store_dir, &work_dir, &bin_dir] {
            std::fs::create_dir_all(dir).expect("Failed to create harness dir");
        }

        let db = Database::open_in_memory().expect("Failed to open database");
        let store: Arc<dyn ObjectStore> = Arc::new(FileSystemStore::new(&store_dir));
        let objects = Arc::new(ObjectAdmin::with_database(store, &db));

        Self {
            temp_dir,
            db,
            objects,
            store_dir,
            work_dir,
            bin_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes an executable shell script standing in for the synthesizer.
    pub fn write_executable(&self, name: &str, body: &str) -> PathBuf {
        let path = self.bin_dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write stub");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod stub");
        path
    }

    pub fn processor_config(&self, executable: PathBuf) -> ProcessorConfig {
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        ProcessorConfig {
            executable,
            work_dir: self.work_dir.clone(),
            bucket: BUCKET.to_string(),
            base_path: BASE_PATH.to_string(),
            env,
            extra_args: Vec::new(),
            process_timeout: Duration::from_secs(30),
            keep_work_dir: false,
        }
    }

    /// Processor running the stub script `body`.
    pub fn processor(&self, body: &str) -> Arc<Processor> {
        let executable = self.write_executable("synth.sh", body);
        self.processor_with(self.processor_config(executable))
    }

    pub fn processor_with(&self, config: ProcessorConfig) -> Arc<Processor> {
        let deps = Collaborators::from_database(
            &self.db,
            Arc::clone(&self.objects),
            Arc::new(NoopNotifier),
        );
        Arc::new(Processor::new(Arc::new(config), deps))
    }

    pub fn submitter(&self, queue: Arc<dyn TaskQueue>) -> Submitter {
        let config = SubmitterConfig {
            bucket: BUCKET.to_string(),
            base_path: BASE_PATH.to_string(),
            max_score_bytes: 1024 * 1024,
            max_queue_wait: Duration::from_secs(60),
            enqueue_timeout: Duration::from_secs(5),
        };
        Submitter::with_database(config, self.objects.clone(), &self.db, queue)
    }

    pub fn history(&self) -> History {
        History::with_database(&self.db, self.objects.clone())
    }

    pub fn process(&self, rid: &str) -> Process {
        process_repo::find_by_request_id(&self.db, rid).expect("process not found")
    }

    pub fn details(&self, rid: &str) -> ProcessDetails {
        let process = self.process(rid);
        details_repo::find_by_id(&self.db, process.details_id).expect("details not found")
    }

    pub fn object(&self, id: i64) -> Object {
        object_repo::find_by_id(&self.db, id).expect("object not found")
    }

    pub fn object_at(&self, path: &str) -> Option<Object> {
        object_repo::find_by_path(&self.db, BUCKET, path).ok()
    }

    /// Bytes the filesystem store holds for `path`.
    pub fn stored_bytes(&self, path: &str) -> Vec<u8> {
        let mut full = self.store_dir.join(BUCKET);
        for segment in path.split('/') {
            full.push(segment);
        }
        std::fs::read(&full).expect("Failed to read stored object")
    }

    /// Names of the entries left in the work directory.
    pub fn work_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.work_dir)
            .expect("Failed to read work dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}
