//! Periodic reclamation of orphaned objects and upload rows.

mod config;
mod scheduler;
mod stats;

use thiserror::Error;

use crate::storage::StorageError;
use crate::store::StoreError;

pub use config::CleanupConfig;
pub use scheduler::StorageCleanupScheduler;
pub use stats::{CleanupCategory, CleanupItemError, CleanupReport, CleanupStats, StorageUsage};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CleanupError {
    #[error("cleanup already in progress")]
    InProgress,

    #[error("cleanup storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("cleanup datastore error: {0}")]
    Store(#[from] StoreError),
}
