//! Object metadata and bytes behind one interface.
//!
//! A File write stores bytes first and records metadata with the size the
//! store reported, so a metadata row never claims bytes that were not
//! persisted. If the metadata insert fails after the bytes were written,
//! the blob is left orphaned in the store.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Blob, ObjectStore, StorageObject};
use crate::db::object_repo::NewObject;
use crate::db::{Database, ObjectCreator, ObjectGetter};
use crate::domain::{Object, ObjectType};
use crate::error::ObjectError;

/// Metadata of an object plus its bytes when it is a File.
#[derive(Debug)]
pub struct StoredObject {
    pub object: Object,
    pub storage: Option<StorageObject>,
}

#[async_trait]
pub trait ObjectReader: Send + Sync {
    async fn read_object(&self, id: i64) -> Result<StoredObject, ObjectError>;
    async fn read_object_by_path(&self, bucket: &str, path: &str)
        -> Result<StoredObject, ObjectError>;
}

#[async_trait]
pub trait ObjectWriter: Send + Sync {
    /// Records an object. `blob` is required for File and ignored for Dir.
    async fn write_object(
        &self,
        object_type: ObjectType,
        bucket: &str,
        path: &str,
        blob: Option<Blob>,
    ) -> Result<Object, ObjectError>;
}

pub struct ObjectAdmin {
    store: Arc<dyn ObjectStore>,
    creator: Arc<dyn ObjectCreator>,
    getter: Arc<dyn ObjectGetter>,
}

impl ObjectAdmin {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        creator: Arc<dyn ObjectCreator>,
        getter: Arc<dyn ObjectGetter>,
    ) -> Self {
        Self {
            store,
            creator,
            getter,
        }
    }

    pub fn with_database(store: Arc<dyn ObjectStore>, db: &Database) -> Self {
        Self::new(store, Arc::new(db.clone()), Arc::new(db.clone()))
    }

    async fn attach_storage(&self, object: Object) -> Result<StoredObject, ObjectError> {
        match object.object_type {
            ObjectType::File => {
                let storage = self.store.get(&object.bucket, &object.path).await?;
                Ok(StoredObject {
                    object,
                    storage: Some(storage),
                })
            }
            ObjectType::Dir => Ok(StoredObject {
                object,
                storage: None,
            }),
        }
    }
}

#[async_trait]
impl ObjectReader for ObjectAdmin {
    async fn read_object(&self, id: i64) -> Result<StoredObject, ObjectError> {
        let object = self.getter.get_object(id)?;
        self.attach_storage(object).await
    }

    async fn read_object_by_path(
        &self,
        bucket: &str,
        path: &str,
    ) -> Result<StoredObject, ObjectError> {
        let object = self.getter.get_object_by_path(bucket, path)?;
        self.attach_storage(object).await
    }
}

#[async_trait]
impl ObjectWriter for ObjectAdmin {
    async fn write_object(
        &self,
        object_type: ObjectType,
        bucket: &str,
        path: &str,
        blob: Option<Blob>,
    ) -> Result<Object, ObjectError> {
        let size_bytes = match object_type {
            ObjectType::File => {
                let blob = blob.ok_or_else(|| ObjectError::MissingBlob {
                    bucket: bucket.to_string(),
                    path: path.to_string(),
                })?;
                self.store.create(bucket, path, blob).await?
            }
            ObjectType::Dir => 0,
        };

        let object = self
            .creator
            .create_object(&NewObject {
                object_type,
                bucket: bucket.to_string(),
                path: path.to_string(),
                size_bytes,
            })
            .inspect_err(|e| {
                if object_type == ObjectType::File {
                    tracing::warn!(bucket, path, error = %e, "Stored bytes but failed to record object metadata");
                }
            })?;
        Ok(object)
    }
}
