//! Blob storage addressed by (bucket, path), with interchangeable backends.

use std::fmt;
use std::io::{Read, Seek};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;

pub mod admin;
pub mod filesystem;
pub mod s3;

pub use admin::{ObjectAdmin, ObjectReader, ObjectWriter, StoredObject};
pub use filesystem::FileSystemStore;
pub use s3::S3Store;

pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// A readable, seekable byte source handed to or returned by a store.
pub type Blob = Box<dyn ReadSeek>;

/// Bytes behind a File object, as exchanged with an [`ObjectStore`].
pub struct StorageObject {
    pub bucket: String,
    pub path: String,
    pub blob: Blob,
    pub size_bytes: u64,
}

impl StorageObject {
    /// Reads the whole blob into memory.
    pub fn into_bytes(mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(usize::try_from(self.size_bytes).unwrap_or(0));
        self.blob.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Debug for StorageObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageObject")
            .field("bucket", &self.bucket)
            .field("path", &self.path)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes the blob, read from its current position to its end, at the
    /// address. Returns the number of bytes stored.
    async fn create(&self, bucket: &str, path: &str, blob: Blob) -> Result<u64, StorageError>;

    /// Returns a fresh reader over previously stored bytes.
    async fn get(&self, bucket: &str, path: &str) -> Result<StorageObject, StorageError>;
}

/// Checks an address is usable by every backend: a bucket is a single
/// segment, a path is a relative slash-separated key without `.`/`..`.
pub fn validate_address(bucket: &str, path: &str) -> Result<(), StorageError> {
    let invalid = |reason| StorageError::InvalidAddress {
        bucket: bucket.to_string(),
        path: path.to_string(),
        reason,
    };

    if bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == ".." {
        return Err(invalid("bucket must be a single non-empty segment"));
    }
    if path.is_empty() || path.starts_with('/') {
        return Err(invalid("path must be a non-empty relative key"));
    }
    if path.contains('\\') || path.contains('\0') {
        return Err(invalid("path contains a forbidden character"));
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid("path segments must be non-empty and not '.' or '..'"));
    }
    Ok(())
}

/// Joins path segments into an object key, skipping empty segments.
pub fn join_key<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    segments
        .into_iter()
        .flat_map(|s| s.split('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Builds the backend selected by the configuration.
pub async fn open(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match config.backend {
        StorageBackend::Filesystem => {
            tracing::info!(root = %config.root_dir.display(), "Using filesystem object store");
            Ok(Arc::new(FileSystemStore::new(&config.root_dir)))
        }
        StorageBackend::S3 => {
            tracing::info!(
                endpoint = config.endpoint_url.as_deref().unwrap_or("default"),
                "Using S3 object store"
            );
            Ok(Arc::new(S3Store::connect(config).await))
        }
    }
}
