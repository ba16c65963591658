//! In-memory stores for tests and local development.
//!
//! Each store keeps its state behind one mutex, so every trait call is atomic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use clipcredit_core::{PaymentId, ProjectId, TransactionId, UploadId, UserId};
use clipcredit_ledger::{LedgerEntry, LedgerError, TokenAccount, TokenTransaction, TransactionType};
use clipcredit_payments::{PaymentRecord, PaymentStatus};

use super::{AdjustOutcome, LedgerStore, PaymentStore, StoreError, UploadRow, UploadStore, page};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a payment has received from the ledger.
#[derive(Debug)]
enum PaymentCredit {
    Credited(TokenTransaction),
    Voided,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<UserId, TokenAccount>,
    transactions: HashMap<UserId, Vec<TokenTransaction>>,
    payments: HashMap<PaymentId, PaymentCredit>,
}

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn balance(&self, user_id: UserId) -> Result<Option<i64>, StoreError> {
        Ok(lock(&self.state).accounts.get(&user_id).map(TokenAccount::balance))
    }

    async fn adjust_balance(&self, entry: &LedgerEntry, at: DateTime<Utc>) -> Result<AdjustOutcome, StoreError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        let mut account = state
            .accounts
            .get(&entry.user_id)
            .cloned()
            .unwrap_or_else(|| TokenAccount::open(entry.user_id));

        let purchase_payment = match (entry.transaction_type, entry.payment_id) {
            (TransactionType::Purchase, Some(payment_id)) => Some(payment_id),
            _ => None,
        };
        if let Some(payment_id) = purchase_payment {
            let balance = account.balance();
            match state.payments.get(&payment_id) {
                Some(PaymentCredit::Credited(_)) => return Ok(AdjustOutcome::Duplicate { balance }),
                Some(PaymentCredit::Voided) => return Ok(AdjustOutcome::Voided { payment_id, balance }),
                None => {}
            }
        }

        let tx = match account.plan(entry, TransactionId::new(), at) {
            Ok(tx) => tx,
            Err(LedgerError::InsufficientTokens { available, .. }) => {
                return Ok(AdjustOutcome::Insufficient { balance: available });
            }
            Err(other) => return Err(StoreError::Conflict(other.to_string())),
        };
        account
            .apply(&tx)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        state.accounts.insert(entry.user_id, account);
        state
            .transactions
            .entry(entry.user_id)
            .or_default()
            .push(tx.clone());
        if let Some(payment_id) = purchase_payment {
            state.payments.insert(payment_id, PaymentCredit::Credited(tx.clone()));
        }

        Ok(AdjustOutcome::Applied(tx))
    }

    async fn void_purchase(
        &self,
        payment_id: PaymentId,
        _at: DateTime<Utc>,
    ) -> Result<Option<TokenTransaction>, StoreError> {
        let mut state = lock(&self.state);
        match state.payments.entry(payment_id).or_insert(PaymentCredit::Voided) {
            PaymentCredit::Credited(tx) => Ok(Some(tx.clone())),
            PaymentCredit::Voided => Ok(None),
        }
    }

    async fn transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TokenTransaction>, StoreError> {
        let state = lock(&self.state);
        let Some(log) = state.transactions.get(&user_id) else {
            return Ok(Vec::new());
        };
        Ok(page(log.iter().rev().cloned(), limit, offset))
    }
}

#[derive(Debug, Default)]
struct PaymentState {
    records: HashMap<PaymentId, PaymentRecord>,
    by_order: HashMap<String, PaymentId>,
}

#[derive(Debug, Default)]
pub struct InMemoryPaymentStore {
    state: Mutex<PaymentState>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, record: &PaymentRecord) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        if state.by_order.contains_key(&record.order_id) {
            return Err(StoreError::Conflict(format!(
                "order {} already recorded",
                record.order_id
            )));
        }
        state.by_order.insert(record.order_id.clone(), record.id);
        state.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PaymentRecord>, StoreError> {
        let state = lock(&self.state);
        Ok(state
            .by_order
            .get(order_id)
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn transition(
        &self,
        id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        metadata: Map<String, Value>,
        at: DateTime<Utc>,
    ) -> Result<PaymentRecord, StoreError> {
        let mut state = lock(&self.state);
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {id}")))?;

        if record.status != from {
            return Err(StoreError::Conflict(format!(
                "payment {id} is {}, expected {from}",
                record.status
            )));
        }
        record
            .transition(to, at)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        record.attach_metadata(metadata, at);
        Ok(record.clone())
    }

    async fn attach_metadata(
        &self,
        id: PaymentId,
        metadata: Map<String, Value>,
        at: DateTime<Utc>,
    ) -> Result<PaymentRecord, StoreError> {
        let mut state = lock(&self.state);
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {id}")))?;
        record.attach_metadata(metadata, at);
        Ok(record.clone())
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentRecord>, StoreError> {
        let state = lock(&self.state);
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page(records.into_iter(), limit, offset))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUploadStore {
    rows: Mutex<HashMap<UploadId, UploadRow>>,
}

impl InMemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, cutoff: DateTime<Utc>, completed: bool) -> Vec<UploadRow> {
        let rows = lock(&self.rows);
        let mut selected: Vec<_> = rows
            .values()
            .filter(|r| r.created_at < cutoff && r.object_path.is_some() == completed)
            .cloned()
            .collect();
        selected.sort_by_key(|r| r.created_at);
        selected
    }
}

#[async_trait]
impl UploadStore for InMemoryUploadStore {
    async fn insert(&self, row: &UploadRow) -> Result<(), StoreError> {
        let mut rows = lock(&self.rows);
        if rows.contains_key(&row.id) {
            return Err(StoreError::Conflict(format!("upload {} already exists", row.id)));
        }
        rows.insert(row.id, row.clone());
        Ok(())
    }

    async fn stale_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadRow>, StoreError> {
        Ok(self.select(cutoff, true))
    }

    async fn failed_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadRow>, StoreError> {
        Ok(self.select(cutoff, false))
    }

    async fn delete_upload(&self, id: UploadId) -> Result<bool, StoreError> {
        Ok(lock(&self.rows).remove(&id).is_some())
    }

    async fn delete_for_object(
        &self,
        user_id: UserId,
        project_id: ProjectId,
        object_path: &str,
    ) -> Result<u64, StoreError> {
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|_, r| {
            !(r.user_id == user_id
                && r.project_id == Some(project_id)
                && r.object_path.as_deref() == Some(object_path))
        });
        Ok((before - rows.len()) as u64)
    }
}
