use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use clipcredit_core::{PaymentId, TransactionId, UserId};

use crate::transaction::{TokenTransaction, TransactionType};

/// Ledger rule violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("token amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("insufficient tokens: {available} available, {requested} required")]
    InsufficientTokens { available: i64, requested: i64 },

    #[error("token balance not found for user: {0}")]
    BalanceNotFound(UserId),

    #[error("invalid ledger entry: {0}")]
    InvalidEntry(String),

    #[error("payment {0} was voided and takes no credit")]
    PaymentVoided(PaymentId),

    /// A transaction does not chain from the balance it is applied to.
    #[error("ledger inconsistent at transaction {transaction}: expected balance {expected}, found {found}")]
    Inconsistent {
        transaction: TransactionId,
        expected: i64,
        found: i64,
    },
}

/// A requested balance movement, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    /// Signed delta applied to the balance.
    pub delta: i64,
    pub description: String,
    pub payment_id: Option<PaymentId>,
}

impl LedgerEntry {
    /// Credit `amount` tokens. A payment-backed credit is a `purchase`,
    /// anything else is a `bonus`.
    pub fn credit(
        user_id: UserId,
        amount: i64,
        description: impl Into<String>,
        payment_id: Option<PaymentId>,
    ) -> Result<Self, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let transaction_type = if payment_id.is_some() {
            TransactionType::Purchase
        } else {
            TransactionType::Bonus
        };
        Ok(Self {
            user_id,
            transaction_type,
            delta: amount,
            description: description.into(),
            payment_id,
        })
    }

    /// Spend `amount` tokens.
    pub fn debit(
        user_id: UserId,
        amount: i64,
        description: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        Ok(Self {
            user_id,
            transaction_type: TransactionType::Usage,
            delta: -amount,
            description: description.into(),
            payment_id: None,
        })
    }

    /// Return `amount` tokens, optionally tied to the payment being refunded.
    pub fn refund(
        user_id: UserId,
        amount: i64,
        description: impl Into<String>,
        payment_id: Option<PaymentId>,
    ) -> Result<Self, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        Ok(Self {
            user_id,
            transaction_type: TransactionType::Refund,
            delta: amount,
            description: description.into(),
            payment_id,
        })
    }

    /// Operator correction in either direction.
    pub fn adjustment(
        user_id: UserId,
        delta: i64,
        description: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        if delta == 0 {
            return Err(LedgerError::InvalidAmount(delta));
        }
        Ok(Self {
            user_id,
            transaction_type: TransactionType::AdminAdjustment,
            delta,
            description: description.into(),
            payment_id: None,
        })
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.delta == 0 {
            return Err(LedgerError::InvalidAmount(0));
        }
        if self.delta < 0 && !self.transaction_type.allows_negative() {
            return Err(LedgerError::InvalidEntry(format!(
                "{} transactions cannot be negative",
                self.transaction_type
            )));
        }
        if self.delta > 0 && !self.transaction_type.allows_positive() {
            return Err(LedgerError::InvalidEntry(format!(
                "{} transactions cannot be positive",
                self.transaction_type
            )));
        }
        Ok(())
    }
}

/// Derived per-user balance.
///
/// Never edited directly: the only way to move the balance is to plan a
/// [`TokenTransaction`] and apply it, so `balance` always equals the sum of the
/// applied amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAccount {
    user_id: UserId,
    balance: i64,
}

impl TokenAccount {
    pub fn open(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: 0,
        }
    }

    /// Restore an account from a cached balance row.
    pub fn from_snapshot(user_id: UserId, balance: i64) -> Self {
        Self { user_id, balance }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    /// Decide the transaction an entry produces against the current balance.
    ///
    /// Does not mutate the account. A movement that would take the balance
    /// below zero fails with `InsufficientTokens`.
    pub fn plan(
        &self,
        entry: &LedgerEntry,
        id: TransactionId,
        at: DateTime<Utc>,
    ) -> Result<TokenTransaction, LedgerError> {
        if entry.user_id != self.user_id {
            return Err(LedgerError::InvalidEntry("entry targets another user".to_string()));
        }
        entry.validate()?;

        let balance_after = self
            .balance
            .checked_add(entry.delta)
            .ok_or_else(|| LedgerError::InvalidEntry("balance overflow".to_string()))?;
        if balance_after < 0 {
            return Err(LedgerError::InsufficientTokens {
                available: self.balance,
                requested: -entry.delta,
            });
        }

        Ok(TokenTransaction {
            id,
            user_id: self.user_id,
            transaction_type: entry.transaction_type,
            amount: entry.delta,
            balance_after,
            description: entry.description.clone(),
            payment_id: entry.payment_id,
            created_at: at,
        })
    }

    /// Evolve the balance by one planned transaction.
    pub fn apply(&mut self, tx: &TokenTransaction) -> Result<(), LedgerError> {
        let expected = self.balance + tx.amount;
        if tx.balance_after != expected {
            return Err(LedgerError::Inconsistent {
                transaction: tx.id,
                expected,
                found: tx.balance_after,
            });
        }
        self.balance = tx.balance_after;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn user() -> UserId {
        UserId::new()
    }

    fn plan_and_apply(account: &mut TokenAccount, entry: &LedgerEntry) -> Result<TokenTransaction, LedgerError> {
        let tx = account.plan(entry, TransactionId::new(), Utc::now())?;
        account.apply(&tx)?;
        Ok(tx)
    }

    #[test]
    fn credit_produces_purchase_with_snapshot() {
        let user_id = user();
        let mut account = TokenAccount::open(user_id);
        let payment_id = PaymentId::new();

        let entry = LedgerEntry::credit(user_id, 160, "basic package", Some(payment_id)).unwrap();
        let tx = plan_and_apply(&mut account, &entry).unwrap();

        assert_eq!(tx.transaction_type, TransactionType::Purchase);
        assert_eq!(tx.amount, 160);
        assert_eq!(tx.balance_after, 160);
        assert_eq!(tx.payment_id, Some(payment_id));
        assert_eq!(account.balance(), 160);
    }

    #[test]
    fn credit_without_payment_is_bonus() {
        let entry = LedgerEntry::credit(user(), 5, "welcome", None).unwrap();
        assert_eq!(entry.transaction_type, TransactionType::Bonus);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        assert_eq!(
            LedgerEntry::credit(user(), 0, "x", None).unwrap_err(),
            LedgerError::InvalidAmount(0)
        );
        assert_eq!(
            LedgerEntry::debit(user(), -3, "x").unwrap_err(),
            LedgerError::InvalidAmount(-3)
        );
        assert!(LedgerEntry::adjustment(user(), 0, "x").is_err());
    }

    #[test]
    fn debit_beyond_balance_reports_both_sides() {
        let user_id = user();
        let account = TokenAccount::from_snapshot(user_id, 30);

        let entry = LedgerEntry::debit(user_id, 50, "render").unwrap();
        let err = account.plan(&entry, TransactionId::new(), Utc::now()).unwrap_err();

        assert_eq!(
            err,
            LedgerError::InsufficientTokens {
                available: 30,
                requested: 50
            }
        );
        assert_eq!(account.balance(), 30);
    }

    #[test]
    fn negative_adjustment_obeys_guard() {
        let user_id = user();
        let account = TokenAccount::from_snapshot(user_id, 10);
        let entry = LedgerEntry::adjustment(user_id, -11, "clawback").unwrap();
        assert!(matches!(
            account.plan(&entry, TransactionId::new(), Utc::now()),
            Err(LedgerError::InsufficientTokens { available: 10, requested: 11 })
        ));
    }

    #[test]
    fn entry_for_other_user_is_rejected() {
        let account = TokenAccount::open(user());
        let entry = LedgerEntry::credit(user(), 1, "x", None).unwrap();
        assert!(matches!(
            account.plan(&entry, TransactionId::new(), Utc::now()),
            Err(LedgerError::InvalidEntry(_))
        ));
    }

    #[test]
    fn apply_detects_broken_chain() {
        let user_id = user();
        let mut account = TokenAccount::open(user_id);
        let entry = LedgerEntry::credit(user_id, 10, "x", None).unwrap();
        let mut tx = account.plan(&entry, TransactionId::new(), Utc::now()).unwrap();
        tx.balance_after = 11;

        let err = account.apply(&tx).unwrap_err();
        assert!(matches!(err, LedgerError::Inconsistent { expected: 10, found: 11, .. }));
        assert_eq!(account.balance(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of credits and debits the balance equals
        /// the sum of all applied amounts, each snapshot chains from the previous
        /// one, and rejected debits leave the balance untouched.
        #[test]
        fn balance_equals_sum_of_transactions(
            ops in prop::collection::vec((any::<bool>(), 1i64..500i64), 1..40)
        ) {
            let user_id = user();
            let mut account = TokenAccount::open(user_id);
            let mut log: Vec<TokenTransaction> = Vec::new();

            for (is_credit, amount) in ops {
                let entry = if is_credit {
                    LedgerEntry::credit(user_id, amount, "credit", None).unwrap()
                } else {
                    LedgerEntry::debit(user_id, amount, "debit").unwrap()
                };

                let before = account.balance();
                match plan_and_apply(&mut account, &entry) {
                    Ok(tx) => {
                        prop_assert_eq!(tx.balance_after, before + tx.amount);
                        log.push(tx);
                    }
                    Err(LedgerError::InsufficientTokens { available, requested }) => {
                        prop_assert!(!is_credit);
                        prop_assert_eq!(available, before);
                        prop_assert_eq!(requested, amount);
                        prop_assert_eq!(account.balance(), before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                }
                prop_assert!(account.balance() >= 0);
            }

            let total: i64 = log.iter().map(|t| t.amount).sum();
            prop_assert_eq!(account.balance(), total);

            let mut rebuilt = TokenAccount::open(user_id);
            for tx in &log {
                rebuilt.apply(tx).unwrap();
            }
            prop_assert_eq!(rebuilt.balance(), account.balance());
        }
    }
}
