use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clipcredit_core::{DomainError, Entity, PaymentId, TransactionId, UserId};

/// Why tokens moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Usage,
    Refund,
    AdminAdjustment,
    Bonus,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Usage => "usage",
            TransactionType::Refund => "refund",
            TransactionType::AdminAdjustment => "admin_adjustment",
            TransactionType::Bonus => "bonus",
        }
    }

    /// Whether a transaction of this type may carry a negative amount.
    pub fn allows_negative(&self) -> bool {
        matches!(self, TransactionType::Usage | TransactionType::AdminAdjustment)
    }

    /// Whether a transaction of this type may carry a positive amount.
    pub fn allows_positive(&self) -> bool {
        !matches!(self, TransactionType::Usage)
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(TransactionType::Purchase),
            "usage" => Ok(TransactionType::Usage),
            "refund" => Ok(TransactionType::Refund),
            "admin_adjustment" => Ok(TransactionType::AdminAdjustment),
            "bonus" => Ok(TransactionType::Bonus),
            other => Err(DomainError::validation(format!(
                "unknown transaction type: {other}"
            ))),
        }
    }
}

/// One immutable row of the append-only token log.
///
/// `amount` is signed (usage is negative); `balance_after` is the account
/// balance snapshot once this transaction has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub balance_after: i64,
    pub description: String,
    /// Back-reference to the payment that funded a purchase.
    pub payment_id: Option<PaymentId>,
    pub created_at: DateTime<Utc>,
}

impl Entity for TokenTransaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
