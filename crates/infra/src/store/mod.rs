//! Datastore abstractions for balances, payments and upload metadata.
//!
//! Every mutation that the services rely on for correctness is a single
//! atomic call on these traits: balance adjustment (with the insufficient
//! funds guard and per-payment de-duplication), voiding a payment's credit,
//! and compare-and-set payment status transitions.

mod in_memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use clipcredit_core::{PaymentId, ProjectId, UploadId, UserId};
use clipcredit_ledger::{LedgerEntry, TokenTransaction};
use clipcredit_payments::{PaymentRecord, PaymentStatus};

use crate::retry::{FailureKind, Retryable};

pub use in_memory::{InMemoryLedgerStore, InMemoryPaymentStore, InMemoryUploadStore};
pub use postgres::{MIGRATOR, PostgresLedgerStore, PostgresPaymentStore, PostgresUploadStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    #[error("datastore error: {0}")]
    Backend(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl Retryable for StoreError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            StoreError::Unavailable(_) | StoreError::Backend(_) => FailureKind::Transient,
            StoreError::NotFound(_) | StoreError::Conflict(_) | StoreError::Corrupt(_) => FailureKind::Terminal,
        }
    }
}

/// Result of an atomic balance adjustment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustOutcome {
    /// The transaction was appended and the balance moved.
    Applied(TokenTransaction),
    /// The movement would take the balance below zero; nothing changed.
    Insufficient { balance: i64 },
    /// A purchase for this payment was already credited; nothing changed.
    Duplicate { balance: i64 },
    /// The payment was voided and takes no credit; nothing changed.
    Voided { payment_id: PaymentId, balance: i64 },
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Cached balance, or `None` when the user has no ledger row yet.
    async fn balance(&self, user_id: UserId) -> Result<Option<i64>, StoreError>;

    /// Apply `entry` atomically: read the balance (creating a zero row if
    /// absent), refuse to go negative, refuse a second purchase for the same
    /// payment, append the transaction and update the balance.
    async fn adjust_balance(&self, entry: &LedgerEntry, at: DateTime<Utc>) -> Result<AdjustOutcome, StoreError>;

    /// Close `payment_id` to purchase credits, atomically with respect to
    /// `adjust_balance`. Returns the purchase if one already landed, in which
    /// case nothing is voided. After `Ok(None)` every later purchase for the
    /// payment is refused as [`AdjustOutcome::Voided`]. Repeatable.
    async fn void_purchase(
        &self,
        payment_id: PaymentId,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenTransaction>, StoreError>;

    /// Newest first.
    async fn transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TokenTransaction>, StoreError>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails with `Conflict` if the order id is already recorded.
    async fn insert(&self, record: &PaymentRecord) -> Result<(), StoreError>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PaymentRecord>, StoreError>;

    /// Compare-and-set: moves the record from `from` to `to` and merges
    /// `metadata`, only if its current status is `from`. Otherwise `Conflict`.
    async fn transition(
        &self,
        id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        metadata: Map<String, Value>,
        at: DateTime<Utc>,
    ) -> Result<PaymentRecord, StoreError>;

    /// Merge metadata without touching the status. Allowed on terminal records.
    async fn attach_metadata(
        &self,
        id: PaymentId,
        metadata: Map<String, Value>,
        at: DateTime<Utc>,
    ) -> Result<PaymentRecord, StoreError>;

    /// Newest first.
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentRecord>, StoreError>;
}

/// Image upload metadata row.
///
/// `object_path` is set once the upload reached object storage; a row without
/// one is an upload that never completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRow {
    pub id: UploadId,
    pub user_id: UserId,
    pub project_id: Option<ProjectId>,
    pub object_path: Option<String>,
    pub size_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn insert(&self, row: &UploadRow) -> Result<(), StoreError>;

    /// Completed uploads created before `cutoff`.
    async fn stale_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadRow>, StoreError>;

    /// Uploads that never received an object, created before `cutoff`.
    async fn failed_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadRow>, StoreError>;

    /// Returns whether a row was removed.
    async fn delete_upload(&self, id: UploadId) -> Result<bool, StoreError>;

    /// Remove the rows of `user_id`/`project_id` that point at `object_path`.
    async fn delete_for_object(
        &self,
        user_id: UserId,
        project_id: ProjectId,
        object_path: &str,
    ) -> Result<u64, StoreError>;
}

/// Apply a `(limit, offset)` page to an iterator already in display order.
pub(crate) fn page<T>(items: impl Iterator<Item = T>, limit: usize, offset: usize) -> Vec<T> {
    items.skip(offset).take(limit).collect()
}
