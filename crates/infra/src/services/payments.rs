//! Purchase orchestration: order creation, capture, and crediting the
//! captured tokens to the ledger.
//!
//! ```text
//! create_order ──▶ PENDING ──capture ok──▶ PROCESSING ──credit ok──▶ SUCCEEDED
//!                     │                        └──credit exhausted──▶ FAILED (alarm)
//!                     ├──capture declined──────────────────────────▶ FAILED
//!                     └──cancel_order──────────────────────────────▶ CANCELLED
//! ```
//!
//! Crediting goes through the shared [`RetryExecutor`] with
//! [`RetryPolicy::crediting`]. A captured payment whose credit keeps failing
//! is closed as FAILED with the provider transaction id kept in metadata, and
//! a reconciliation alarm is logged: charged but uncredited users need manual
//! follow-up.
//!
//! Two callers may credit the same PROCESSING payment at once (a capture and
//! its resume). Before writing FAILED the payment is voided in the ledger,
//! which either refuses every later credit for it or hands back the credit
//! that already landed, in which case the payment closes as SUCCEEDED. When
//! the ledger cannot be reached to void, the payment stays PROCESSING and a
//! later capture resumes it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use clipcredit_core::{PaymentId, UserId};
use clipcredit_payments::{
    CaptureOutcome, NewPayment, PaymentProvider, PaymentRecord, PaymentStatus, TokenPackage, TransitionError,
    find_package, list_packages,
};

use crate::clock::Clock;
use crate::gateway::{GatewayError, GatewayRegistry};
use crate::retry::{AttemptError, RetryExecutor, RetryPolicy};
use crate::services::tokens::{TokenError, TokenLedger};
use crate::store::{PaymentStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("invalid token package: {0}")]
    InvalidPackage(String),

    #[error("payment not found for order {0}")]
    PaymentNotFound(String),

    #[error("payment processing failed: {0}")]
    Processing(String),

    #[error("payment provider {0} is not available")]
    ProviderUnavailable(PaymentProvider),

    #[error("payment for order {order_id} is already {status}")]
    AlreadyFinalized { order_id: String, status: PaymentStatus },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("payment gateway error: {0}")]
    Gateway(GatewayError),

    #[error("payment store error: {0}")]
    Store(#[from] StoreError),
}

impl From<GatewayError> for PaymentError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotConfigured(provider) => PaymentError::ProviderUnavailable(provider),
            other => PaymentError::Gateway(other),
        }
    }
}

/// Handle returned when an order is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedOrder {
    pub payment_id: PaymentId,
    pub order_id: String,
    pub provider: PaymentProvider,
    pub amount: String,
    pub currency: &'static str,
    pub tokens: i64,
}

/// Outcome of a successful capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentResult {
    pub payment_id: PaymentId,
    pub order_id: String,
    pub transaction_id: Option<String>,
    pub status: PaymentStatus,
    pub tokens: i64,
    pub new_balance: i64,
}

/// Read model of a payment for history listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentResponse {
    pub id: PaymentId,
    pub order_id: String,
    pub provider: PaymentProvider,
    pub status: PaymentStatus,
    pub amount: String,
    pub currency: &'static str,
    pub tokens_purchased: i64,
    pub package_id: String,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&PaymentRecord> for PaymentResponse {
    fn from(record: &PaymentRecord) -> Self {
        Self {
            id: record.id,
            order_id: record.order_id.clone(),
            provider: record.provider,
            status: record.status,
            amount: record.amount.to_decimal_string(),
            currency: record.amount.currency.code(),
            tokens_purchased: record.tokens_purchased,
            package_id: record.package_id.clone(),
            transaction_id: record.transaction_id().map(str::to_string),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

fn metadata(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[derive(Clone)]
pub struct PaymentReconciler {
    payments: Arc<dyn PaymentStore>,
    tokens: TokenLedger,
    gateways: GatewayRegistry,
    clock: Arc<dyn Clock>,
    crediting: RetryExecutor,
}

impl PaymentReconciler {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        tokens: TokenLedger,
        gateways: GatewayRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            payments,
            tokens,
            gateways,
            clock,
            crediting: RetryExecutor::new(RetryPolicy::crediting()),
        }
    }

    pub fn with_crediting_policy(mut self, policy: RetryPolicy) -> Self {
        self.crediting = RetryExecutor::new(policy);
        self
    }

    pub fn list_packages(&self) -> &'static [TokenPackage] {
        list_packages()
    }

    /// Open an order for `package_id` with `provider` and persist it as PENDING.
    ///
    /// No retry here: a failed order creation surfaces to the caller.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn create_order(
        &self,
        user_id: UserId,
        package_id: &str,
        provider: PaymentProvider,
    ) -> Result<CreatedOrder, PaymentError> {
        let package = find_package(package_id).ok_or_else(|| PaymentError::InvalidPackage(package_id.to_string()))?;
        let gateway = self.gateways.get(provider)?;

        let order_id = gateway
            .create_order(&package.price, &package.order_description())
            .await?;

        let record = PaymentRecord::open(
            NewPayment {
                user_id,
                provider,
                order_id: order_id.clone(),
                amount: package.price,
                tokens_purchased: package.tokens,
                package_id: package.id.to_string(),
            },
            self.clock.now(),
        );
        self.payments.insert(&record).await?;

        info!(
            payment_id = %record.id,
            order_id = %order_id,
            package_id = package.id,
            tokens = package.tokens,
            "payment order created"
        );

        Ok(CreatedOrder {
            payment_id: record.id,
            order_id,
            provider,
            amount: package.price.to_decimal_string(),
            currency: package.price.currency.code(),
            tokens: package.tokens,
        })
    }

    /// Capture `order_id` and credit its tokens.
    ///
    /// A PROCESSING record (captured, crediting interrupted) resumes crediting
    /// without calling the provider again. A finalized record is returned as
    /// `AlreadyFinalized` untouched.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn capture_payment(&self, user_id: UserId, order_id: &str) -> Result<PaymentResult, PaymentError> {
        let record = self.load_owned(user_id, order_id).await?;

        match record.status {
            PaymentStatus::Pending => self.capture_pending(record).await,
            PaymentStatus::Processing => {
                info!(payment_id = %record.id, "resuming crediting for captured payment");
                self.credit_captured(record).await
            }
            status => Err(PaymentError::AlreadyFinalized {
                order_id: record.order_id,
                status,
            }),
        }
    }

    /// Abandon a PENDING order.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn cancel_order(&self, user_id: UserId, order_id: &str) -> Result<PaymentRecord, PaymentError> {
        let record = self.load_owned(user_id, order_id).await?;
        if record.status.is_terminal() {
            return Err(PaymentError::AlreadyFinalized {
                order_id: record.order_id,
                status: record.status,
            });
        }
        if !record.status.can_transition_to(PaymentStatus::Cancelled) {
            return Err(TransitionError {
                from: record.status,
                to: PaymentStatus::Cancelled,
            }
            .into());
        }
        self.move_status(&record, PaymentStatus::Pending, PaymentStatus::Cancelled, Map::new())
            .await
    }

    /// Page of the user's payments, newest first.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn get_payment_history(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentResponse>, PaymentError> {
        let records = self.payments.list_for_user(user_id, limit, offset).await?;
        Ok(records.iter().map(PaymentResponse::from).collect())
    }

    async fn load_owned(&self, user_id: UserId, order_id: &str) -> Result<PaymentRecord, PaymentError> {
        self.payments
            .find_by_order_id(order_id)
            .await?
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| PaymentError::PaymentNotFound(order_id.to_string()))
    }

    async fn capture_pending(&self, record: PaymentRecord) -> Result<PaymentResult, PaymentError> {
        let gateway = self.gateways.get(record.provider)?;

        let outcome = match gateway.capture_order(&record.order_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // Capture state unknown; leave the record PENDING so the capture can be retried.
                warn!(payment_id = %record.id, error = %err, "capture request failed");
                return Err(err.into());
            }
        };

        match outcome {
            CaptureOutcome::Declined { reason } => {
                self.move_status(
                    &record,
                    PaymentStatus::Pending,
                    PaymentStatus::Failed,
                    metadata([("error", json!(reason))]),
                )
                .await?;
                warn!(payment_id = %record.id, reason = %reason, "payment capture declined");
                Err(PaymentError::Processing(format!("capture declined: {reason}")))
            }
            CaptureOutcome::Completed { transaction_id } => {
                let processing = self
                    .move_status(
                        &record,
                        PaymentStatus::Pending,
                        PaymentStatus::Processing,
                        metadata([("transaction_id", json!(transaction_id))]),
                    )
                    .await?;
                self.credit_captured(processing).await
            }
        }
    }

    async fn credit_captured(&self, record: PaymentRecord) -> Result<PaymentResult, PaymentError> {
        let description = format!("Purchase of {} tokens ({})", record.tokens_purchased, record.package_id);
        let tokens = &self.tokens;
        let desc = description.as_str();
        let (user_id, amount, payment_id) = (record.user_id, record.tokens_purchased, record.id);

        let credited = self
            .crediting
            .run("payment.credit_tokens", move |_| tokens.credit(user_id, amount, desc, Some(payment_id)))
            .await;

        match credited {
            Ok(new_balance) => self.settle_credited(&record, new_balance).await,
            Err(err) => self.close_uncredited(&record, err).await,
        }
    }

    /// PROCESSING to SUCCEEDED once the ledger holds the purchase.
    async fn settle_credited(&self, record: &PaymentRecord, new_balance: i64) -> Result<PaymentResult, PaymentError> {
        let done = match self
            .move_status(record, PaymentStatus::Processing, PaymentStatus::Succeeded, Map::new())
            .await
        {
            Ok(done) => done,
            Err(PaymentError::AlreadyFinalized { status, .. }) if status != PaymentStatus::Succeeded => {
                return Err(self.flag_credited_but_closed(record, status, new_balance).await);
            }
            Err(other) => return Err(other),
        };

        info!(
            payment_id = %done.id,
            order_id = %done.order_id,
            tokens = done.tokens_purchased,
            new_balance,
            "payment completed"
        );
        Ok(PaymentResult {
            payment_id: done.id,
            order_id: done.order_id.clone(),
            transaction_id: done.transaction_id().map(str::to_string),
            status: done.status,
            tokens: done.tokens_purchased,
            new_balance,
        })
    }

    /// Crediting ran out of attempts. Void the payment in the ledger, then
    /// close it as FAILED, unless a concurrent caller's credit already landed.
    async fn close_uncredited(
        &self,
        record: &PaymentRecord,
        err: AttemptError<TokenError>,
    ) -> Result<PaymentResult, PaymentError> {
        let transaction_id = record.transaction_id().map(str::to_string);

        match self.tokens.void_purchase(record.id).await {
            Ok(Some(purchase)) => {
                info!(
                    payment_id = %record.id,
                    ledger_transaction_id = %purchase.id,
                    "purchase credited by a concurrent capture"
                );
                self.settle_credited(record, purchase.balance_after).await
            }
            Ok(None) => {
                error!(
                    alarm = "reconciliation",
                    payment_id = %record.id,
                    order_id = %record.order_id,
                    user_id = %record.user_id,
                    transaction_id = ?transaction_id,
                    tokens = record.tokens_purchased,
                    error = %err,
                    "payment captured but tokens could not be credited"
                );
                let mut meta = metadata([("error", json!(err.to_string()))]);
                if let Some(txid) = &transaction_id {
                    meta.insert("transaction_id".to_string(), json!(txid));
                }
                self.move_status(record, PaymentStatus::Processing, PaymentStatus::Failed, meta)
                    .await?;
                Err(PaymentError::Processing(format!("tokens could not be credited: {err}")))
            }
            Err(void_err) => {
                error!(
                    alarm = "reconciliation",
                    payment_id = %record.id,
                    order_id = %record.order_id,
                    user_id = %record.user_id,
                    transaction_id = ?transaction_id,
                    error = %err,
                    void_error = %void_err,
                    "tokens could not be credited and the payment could not be voided; left PROCESSING"
                );
                let meta = metadata([("last_credit_error", json!(err.to_string()))]);
                if let Err(store_err) = self.payments.attach_metadata(record.id, meta, self.clock.now()).await {
                    warn!(payment_id = %record.id, error = %store_err, "could not record crediting failure");
                }
                Err(PaymentError::Processing(format!("tokens could not be credited: {err}")))
            }
        }
    }

    /// The ledger holds a purchase for a payment that was closed as
    /// something other than SUCCEEDED. Keep the evidence on the record.
    async fn flag_credited_but_closed(
        &self,
        record: &PaymentRecord,
        status: PaymentStatus,
        new_balance: i64,
    ) -> PaymentError {
        error!(
            alarm = "reconciliation",
            payment_id = %record.id,
            order_id = %record.order_id,
            user_id = %record.user_id,
            status = %status,
            tokens = record.tokens_purchased,
            new_balance,
            "tokens credited to a payment that is already closed"
        );
        let meta = metadata([("credited_tokens", json!(record.tokens_purchased))]);
        if let Err(store_err) = self.payments.attach_metadata(record.id, meta, self.clock.now()).await {
            warn!(payment_id = %record.id, error = %store_err, "could not record credited tokens");
        }
        PaymentError::AlreadyFinalized {
            order_id: record.order_id.clone(),
            status,
        }
    }

    /// Compare-and-set status change. Losing the race to another caller is
    /// reported from the record's fresh state.
    async fn move_status(
        &self,
        record: &PaymentRecord,
        from: PaymentStatus,
        to: PaymentStatus,
        meta: Map<String, Value>,
    ) -> Result<PaymentRecord, PaymentError> {
        match self
            .payments
            .transition(record.id, from, to, meta, self.clock.now())
            .await
        {
            Ok(updated) => Ok(updated),
            Err(StoreError::Conflict(msg)) => {
                let current = self
                    .payments
                    .find_by_order_id(&record.order_id)
                    .await?
                    .map(|r| r.status)
                    .unwrap_or(record.status);
                warn!(payment_id = %record.id, current = %current, %msg, "payment status changed concurrently");
                if current.is_terminal() {
                    Err(PaymentError::AlreadyFinalized {
                        order_id: record.order_id.clone(),
                        status: current,
                    })
                } else {
                    Err(TransitionError { from: current, to }.into())
                }
            }
            Err(other) => Err(other.into()),
        }
    }
}
