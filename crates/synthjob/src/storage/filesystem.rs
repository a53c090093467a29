use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{validate_address, Blob, ObjectStore, StorageObject};
use crate::error::StorageError;

/// Object store mapping `(bucket, path)` to `root/bucket/path` on disk.
pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, bucket: &str, path: &str) -> Result<PathBuf, StorageError> {
        validate_address(bucket, path)?;
        let mut full = self.root.join(bucket);
        for segment in path.split('/') {
            full.push(segment);
        }
        Ok(full)
    }
}

#[async_trait]
impl ObjectStore for FileSystemStore {
    async fn create(&self, bucket: &str, path: &str, blob: Blob) -> Result<u64, StorageError> {
        let target = self.resolve(bucket, path)?;
        let (bucket, path) = (bucket.to_string(), path.to_string());

        tokio::task::spawn_blocking(move || write_atomically(&target, blob))
            .await?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => StorageError::AlreadyExists { bucket, path },
                _ => StorageError::io(&bucket, &path, e),
            })
    }

    async fn get(&self, bucket: &str, path: &str) -> Result<StorageObject, StorageError> {
        let target = self.resolve(bucket, path)?;
        let (bucket, path) = (bucket.to_string(), path.to_string());

        tokio::task::spawn_blocking(move || {
            let file = match File::open(&target) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::NotFound { bucket, path });
                }
                Err(e) => return Err(StorageError::io(&bucket, &path, e)),
            };
            let metadata = file
                .metadata()
                .map_err(|e| StorageError::io(&bucket, &path, e))?;
            if !metadata.is_file() {
                return Err(StorageError::NotFound { bucket, path });
            }
            Ok(StorageObject {
                bucket,
                path,
                size_bytes: metadata.len(),
                blob: Box::new(file),
            })
        })
        .await?
    }
}

/// Streams the blob into a sibling temp file, then links it into place so
/// readers never observe a partially written object. An existing target is
/// never replaced: linking fails with `AlreadyExists` instead.
fn write_atomically(target: &Path, mut blob: Blob) -> std::io::Result<u64> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if target.symlink_metadata().is_ok() {
        return Err(std::io::Error::from(std::io::ErrorKind::AlreadyExists));
    }

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = target.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let written = copy_and_link(&mut blob, &tmp, target);
    let _ = std::fs::remove_file(&tmp);
    written
}

fn copy_and_link(blob: &mut Blob, tmp: &Path, target: &Path) -> std::io::Result<u64> {
    let mut out = File::create_new(tmp)?;
    let written = std::io::copy(blob, &mut out)?;
    out.flush()?;
    out.sync_all()?;
    std::fs::hard_link(tmp, target)?;
    Ok(written)
}
