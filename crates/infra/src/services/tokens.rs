//! Token balance service: the single writer of balances and the token log.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use clipcredit_core::{PaymentId, UserId};
use clipcredit_ledger::{LedgerEntry, LedgerError, TokenTransaction};

use crate::clock::Clock;
use crate::retry::{FailureKind, Retryable};
use crate::store::{AdjustOutcome, LedgerStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("token store error: {0}")]
    Store(#[from] StoreError),
}

impl Retryable for TokenError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            TokenError::Ledger(_) => FailureKind::Terminal,
            TokenError::Store(err) => err.failure_kind(),
        }
    }
}

#[derive(Clone)]
pub struct TokenLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl TokenLedger {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Current balance. A user without a ledger row is `BalanceNotFound`;
    /// use [`TokenLedger::balance_or_zero`] where absence means zero.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn get_balance(&self, user_id: UserId) -> Result<i64, TokenError> {
        self.store
            .balance(user_id)
            .await?
            .ok_or(TokenError::Ledger(LedgerError::BalanceNotFound(user_id)))
    }

    pub async fn balance_or_zero(&self, user_id: UserId) -> Result<i64, TokenError> {
        Ok(self.store.balance(user_id).await?.unwrap_or(0))
    }

    /// Add tokens and return the new balance.
    ///
    /// With a `payment_id` this is a `purchase` and is idempotent per payment:
    /// crediting the same payment again returns the current balance without
    /// appending anything. Without one it is a `bonus`.
    #[instrument(skip(self, description), fields(user_id = %user_id, payment_id = ?payment_id), err)]
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: i64,
        description: &str,
        payment_id: Option<PaymentId>,
    ) -> Result<i64, TokenError> {
        let entry = LedgerEntry::credit(user_id, amount, description, payment_id)?;
        self.apply(&entry).await
    }

    /// Spend tokens. Fails with `InsufficientTokens` and changes nothing when
    /// the balance is below `amount`.
    #[instrument(skip(self, description), fields(user_id = %user_id), err)]
    pub async fn debit(&self, user_id: UserId, amount: i64, description: &str) -> Result<i64, TokenError> {
        let entry = LedgerEntry::debit(user_id, amount, description)?;
        self.apply(&entry).await
    }

    #[instrument(skip(self, description), fields(user_id = %user_id, payment_id = ?payment_id), err)]
    pub async fn refund(
        &self,
        user_id: UserId,
        amount: i64,
        description: &str,
        payment_id: Option<PaymentId>,
    ) -> Result<i64, TokenError> {
        let entry = LedgerEntry::refund(user_id, amount, description, payment_id)?;
        self.apply(&entry).await
    }

    pub async fn grant_bonus(&self, user_id: UserId, amount: i64, description: &str) -> Result<i64, TokenError> {
        self.credit(user_id, amount, description, None).await
    }

    /// Operator correction; negative deltas obey the insufficient-funds guard.
    #[instrument(skip(self, description), fields(user_id = %user_id), err)]
    pub async fn admin_adjust(&self, user_id: UserId, delta: i64, description: &str) -> Result<i64, TokenError> {
        let entry = LedgerEntry::adjustment(user_id, delta, description)?;
        self.apply(&entry).await
    }

    /// Close `payment_id` to purchase credits unless one already landed.
    ///
    /// Returns the existing purchase, if any. Once this returns `None` a
    /// later `credit` for the payment fails with `PaymentVoided` and changes
    /// nothing.
    #[instrument(skip(self), fields(payment_id = %payment_id), err)]
    pub async fn void_purchase(&self, payment_id: PaymentId) -> Result<Option<TokenTransaction>, TokenError> {
        Ok(self.store.void_purchase(payment_id, self.clock.now()).await?)
    }

    /// Newest first.
    pub async fn list_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TokenTransaction>, TokenError> {
        Ok(self.store.transactions(user_id, limit, offset).await?)
    }

    async fn apply(&self, entry: &LedgerEntry) -> Result<i64, TokenError> {
        match self.store.adjust_balance(entry, self.clock.now()).await? {
            AdjustOutcome::Applied(tx) => {
                info!(
                    transaction_id = %tx.id,
                    transaction_type = %tx.transaction_type,
                    amount = tx.amount,
                    balance_after = tx.balance_after,
                    "token transaction recorded"
                );
                Ok(tx.balance_after)
            }
            AdjustOutcome::Insufficient { balance } => Err(LedgerError::InsufficientTokens {
                available: balance,
                requested: -entry.delta,
            }
            .into()),
            AdjustOutcome::Duplicate { balance } => {
                info!(payment_id = ?entry.payment_id, balance, "payment already credited, skipping");
                Ok(balance)
            }
            AdjustOutcome::Voided { payment_id, balance } => {
                warn!(payment_id = %payment_id, balance, "credit refused for voided payment");
                Err(LedgerError::PaymentVoided(payment_id).into())
            }
        }
    }
}
