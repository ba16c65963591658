//! Object storage capability consumed by uploads and the cleanup sweeps.

mod adapter;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use clipcredit_core::{ProjectId, UserId};

use crate::retry::{FailureKind, Retryable};

pub use adapter::ObjectStoreStorage;

/// One entry of an object listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    pub path: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    /// Owner parsed from the path, when the path follows the upload layout.
    pub user_id: Option<UserId>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("upload of {path} failed: {message}")]
    Upload { path: String, message: String },

    #[error("download of {path} failed: {message}")]
    Download { path: String, message: String },

    #[error("delete of {path} failed: {message}")]
    Delete { path: String, message: String },

    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("invalid file: {0}")]
    InvalidFile(String),

    #[error("storage connection failed: {0}")]
    Connection(String),

    #[error("storage {operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("storage permission denied: {0}")]
    Permission(String),

    #[error("object not found: {0}")]
    NotFound(String),
}

impl Retryable for StorageError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            StorageError::Upload { .. }
            | StorageError::Download { .. }
            | StorageError::Delete { .. }
            | StorageError::Connection(_)
            | StorageError::Timeout { .. } => FailureKind::Transient,
            StorageError::QuotaExceeded(_)
            | StorageError::InvalidFile(_)
            | StorageError::Permission(_)
            | StorageError::NotFound(_) => FailureKind::Terminal,
        }
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` at `path` and return the public URL of the object.
    async fn upload(&self, bytes: Bytes, path: &str, content_type: &str) -> Result<String, StorageError>;

    /// All objects whose path starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<StorageObject>, StorageError>;

    /// Remove every path. Missing objects are not an error.
    async fn delete(&self, paths: &[String]) -> Result<(), StorageError>;

    async fn download(&self, path: &str) -> Result<Bytes, StorageError>;
}

/// Object path for a user's project upload:
/// `{prefix}/{user_id}/projects/{project_id}/{file_name}`.
pub fn upload_path(prefix: &str, user_id: UserId, project_id: ProjectId, file_name: &str) -> String {
    format!(
        "{}/{user_id}/projects/{project_id}/{file_name}",
        prefix.trim_end_matches('/')
    )
}

/// The user segment directly under `prefix`, if it parses as a user id.
pub fn owner_from_path(prefix: &str, path: &str) -> Option<UserId> {
    let rest = path.strip_prefix(prefix.trim_end_matches('/'))?;
    let first = rest.trim_start_matches('/').split('/').next()?;
    first.parse().ok()
}

/// The segment following `projects/`, if it parses as a project id.
pub fn project_from_path(path: &str) -> Option<ProjectId> {
    let mut segments = path.split('/');
    segments.find(|s| *s == "projects")?;
    segments.next()?.parse().ok()
}
