use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectMeta, ObjectStore, PutOptions, PutPayload};
use tracing::{debug, instrument};

use crate::retry::{AttemptError, RetryExecutor, RetryPolicy};

use super::{ObjectStorage, StorageError, StorageObject, owner_from_path};

#[derive(Debug, Clone, Copy)]
enum StorageOp {
    Upload,
    List,
    Delete,
    Download,
}

/// [`ObjectStorage`] over any `object_store` backend (in-memory, local
/// filesystem, S3, ...). Every call goes through the storage retry policy.
#[derive(Debug, Clone)]
pub struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
    retry: RetryExecutor,
}

impl ObjectStoreStorage {
    pub fn new(store: Arc<dyn ObjectStore>, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into(),
            retry: RetryExecutor::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), "memory://")
    }

    pub fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), path)
    }
}

fn parse_path(path: &str) -> Result<ObjectPath, StorageError> {
    ObjectPath::parse(path).map_err(|e| StorageError::InvalidFile(format!("{path}: {e}")))
}

fn map_error(op: StorageOp, path: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(path.to_string()),
        object_store::Error::PermissionDenied { .. } | object_store::Error::Unauthenticated { .. } => {
            StorageError::Permission(format!("{path}: {err}"))
        }
        object_store::Error::InvalidPath { .. } => StorageError::InvalidFile(format!("{path}: {err}")),
        other => {
            let path = path.to_string();
            let message = other.to_string();
            match op {
                StorageOp::Upload => StorageError::Upload { path, message },
                StorageOp::Download => StorageError::Download { path, message },
                StorageOp::Delete => StorageError::Delete { path, message },
                StorageOp::List => StorageError::Connection(format!("listing {path}: {message}")),
            }
        }
    }
}

fn flatten(err: AttemptError<StorageError>) -> StorageError {
    err.into_inner_or_else(|operation, timeout| StorageError::Timeout { operation, timeout })
}

#[async_trait]
impl ObjectStorage for ObjectStoreStorage {
    #[instrument(skip(self, bytes), fields(size = bytes.len()), err)]
    async fn upload(&self, bytes: Bytes, path: &str, content_type: &str) -> Result<String, StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::InvalidFile(format!("{path}: empty upload")));
        }
        let location = parse_path(path)?;

        self.retry
            .run("storage.upload", |_| {
                let store = Arc::clone(&self.store);
                let location = location.clone();
                let payload = PutPayload::from(bytes.clone());
                let mut attributes = Attributes::new();
                attributes.insert(Attribute::ContentType, content_type.to_string().into());
                let opts = PutOptions {
                    attributes,
                    ..Default::default()
                };
                async move {
                    store
                        .put_opts(&location, payload, opts)
                        .await
                        .map(|_| ())
                        .map_err(|e| map_error(StorageOp::Upload, path, e))
                }
            })
            .await
            .map_err(flatten)?;

        Ok(self.public_url(path))
    }

    #[instrument(skip(self), err)]
    async fn list(&self, prefix: &str) -> Result<Vec<StorageObject>, StorageError> {
        let location = parse_path(prefix)?;

        let metas: Vec<ObjectMeta> = self
            .retry
            .run("storage.list", |_| {
                let store = Arc::clone(&self.store);
                let location = location.clone();
                async move {
                    store
                        .list(Some(&location))
                        .try_collect::<Vec<_>>()
                        .await
                        .map_err(|e| map_error(StorageOp::List, prefix, e))
                }
            })
            .await
            .map_err(flatten)?;

        debug!(count = metas.len(), "listed objects");

        Ok(metas
            .into_iter()
            .map(|meta| {
                let path = meta.location.to_string();
                StorageObject {
                    user_id: owner_from_path(prefix, &path),
                    last_modified: meta.last_modified,
                    size: meta.size,
                    path,
                }
            })
            .collect())
    }

    #[instrument(skip(self), fields(count = paths.len()), err)]
    async fn delete(&self, paths: &[String]) -> Result<(), StorageError> {
        for path in paths {
            let location = parse_path(path)?;
            self.retry
                .run("storage.delete", |_| {
                    let store = Arc::clone(&self.store);
                    let location = location.clone();
                    async move {
                        match store.delete(&location).await {
                            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
                            Err(e) => Err(map_error(StorageOp::Delete, path, e)),
                        }
                    }
                })
                .await
                .map_err(flatten)?;
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn download(&self, path: &str) -> Result<Bytes, StorageError> {
        let location = parse_path(path)?;

        self.retry
            .run("storage.download", |_| {
                let store = Arc::clone(&self.store);
                let location = location.clone();
                async move {
                    let result = store
                        .get(&location)
                        .await
                        .map_err(|e| map_error(StorageOp::Download, path, e))?;
                    result
                        .bytes()
                        .await
                        .map_err(|e| map_error(StorageOp::Download, path, e))
                }
            })
            .await
            .map_err(flatten)
    }
}
