use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use clipcredit_core::{DomainError, Entity, PaymentId, UserId};

use crate::catalog::Money;

/// Which payment provider handled an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    /// In-process provider that always settles; used in development and tests.
    Mock,
    Paypal,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Mock => "mock",
            PaymentProvider::Paypal => "paypal",
        }
    }
}

impl Default for PaymentProvider {
    fn default() -> Self {
        Self::Mock
    }
}

impl core::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PaymentProvider {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mock" => Ok(PaymentProvider::Mock),
            "paypal" => Ok(PaymentProvider::Paypal),
            other => Err(DomainError::validation(format!("unknown payment provider: {other}"))),
        }
    }
}

/// Payment record status lifecycle.
///
/// ```text
/// PENDING ──capture ok──▶ PROCESSING ──credit ok──▶ SUCCEEDED
///    │                        └──────credit failed──▶ FAILED
///    ├──capture declined──────────────────────────▶ FAILED
///    └──cancel────────────────────────────────────▶ CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded | PaymentStatus::Failed | PaymentStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Succeeded)
                | (Processing, Failed)
        )
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PROCESSING" => Ok(PaymentStatus::Processing),
            "SUCCEEDED" => Ok(PaymentStatus::Succeeded),
            "FAILED" => Ok(PaymentStatus::Failed),
            "CANCELLED" => Ok(PaymentStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown payment status: {other}"))),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("illegal payment status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

/// What the provider reported for a capture request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaptureOutcome {
    Completed { transaction_id: String },
    Declined { reason: String },
}

/// Input for opening a payment record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub user_id: UserId,
    pub provider: PaymentProvider,
    pub order_id: String,
    pub amount: Money,
    pub tokens_purchased: i64,
    pub package_id: String,
}

/// Financial audit record for one purchase. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub user_id: UserId,
    pub provider: PaymentProvider,
    pub order_id: String,
    pub amount: Money,
    pub status: PaymentStatus,
    pub tokens_purchased: i64,
    pub package_id: String,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for PaymentRecord {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl PaymentRecord {
    /// A freshly opened order, always `PENDING`.
    pub fn open(new: NewPayment, at: DateTime<Utc>) -> Self {
        Self {
            id: PaymentId::new(),
            user_id: new.user_id,
            provider: new.provider,
            order_id: new.order_id,
            amount: new.amount,
            status: PaymentStatus::Pending,
            tokens_purchased: new.tokens_purchased,
            package_id: new.package_id,
            metadata: Map::new(),
            created_at: at,
            updated_at: at,
        }
    }

    /// Move to `next`, rejecting anything the lifecycle does not allow.
    pub fn transition(&mut self, next: PaymentStatus, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    /// Merge keys into the metadata map. Allowed in every status.
    pub fn attach_metadata(&mut self, patch: Map<String, Value>, at: DateTime<Utc>) {
        if patch.is_empty() {
            return;
        }
        self.metadata.extend(patch);
        self.updated_at = at;
    }

    /// Provider transaction id recorded at capture time, if any.
    pub fn transaction_id(&self) -> Option<&str> {
        self.metadata.get("transaction_id").and_then(Value::as_str)
    }
}
