//! Postgres-backed stores.
//!
//! Schema lives in `migrations/` and is applied with [`MIGRATOR`].
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (check violation) | `23514` | `Conflict` |
//! | Database (other) | any | `Backend` |
//! | PoolClosed / PoolTimedOut / Io / Tls | n/a | `Unavailable` |
//! | RowNotFound | n/a | `NotFound` |
//! | ColumnDecode / Decode | n/a | `Corrupt` |
//!
//! ## Balance atomicity
//!
//! `adjust_balance` runs in one SQL transaction holding `SELECT ... FOR UPDATE`
//! on the user's balance row, so adjustments for one user are serialized by
//! the database. The partial unique index on purchase `payment_id` backs the
//! per-payment de-duplication.
//!
//! A purchase and `void_purchase` for the same payment both take a
//! transaction-scoped advisory lock keyed on the payment id, so exactly one
//! of "credited" or "voided" is ever recorded for it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use clipcredit_core::{PaymentId, ProjectId, TransactionId, UploadId, UserId};
use clipcredit_ledger::{LedgerEntry, LedgerError, TokenAccount, TokenTransaction, TransactionType};
use clipcredit_payments::{Currency, Money, PaymentRecord, PaymentStatus};

use super::{AdjustOutcome, LedgerStore, PaymentStore, StoreError, UploadRow, UploadStore};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23514") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {operation}: {e}")),
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row not found in {operation}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {operation}: {err}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {err}"))
}

const TRANSACTION_COLUMNS: &str =
    "id, user_id, transaction_type, amount, balance_after, description, payment_id, created_at";

async fn lock_payment(conn: &mut sqlx::PgConnection, payment_id: PaymentId) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::uuid::text, 0))")
        .bind(payment_id.as_uuid())
        .execute(conn)
        .await
        .map(|_| ())
        .map_err(|e| map_sqlx_error("lock_payment", e))
}

async fn find_purchase(
    conn: &mut sqlx::PgConnection,
    payment_id: PaymentId,
) -> Result<Option<TokenTransaction>, StoreError> {
    let sql = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM token_transactions WHERE payment_id = $1 AND transaction_type = 'purchase'"
    );
    let row = sqlx::query(&sql)
        .bind(payment_id.as_uuid())
        .fetch_optional(conn)
        .await
        .map_err(|e| map_sqlx_error("find_purchase", e))?;

    row.map(|row| {
        TransactionRow::from_row(&row)
            .map_err(|e| map_sqlx_error("find_purchase", e))
            .and_then(TokenTransaction::try_from)
    })
    .transpose()
}

async fn is_voided(conn: &mut sqlx::PgConnection, payment_id: PaymentId) -> Result<bool, StoreError> {
    sqlx::query("SELECT 1 FROM voided_payments WHERE payment_id = $1")
        .bind(payment_id.as_uuid())
        .fetch_optional(conn)
        .await
        .map(|row| row.is_some())
        .map_err(|e| map_sqlx_error("check_voided", e))
}

// Ledger

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[derive(Debug)]
struct TransactionRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    transaction_type: String,
    amount: i64,
    balance_after: i64,
    description: String,
    payment_id: Option<uuid::Uuid>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            transaction_type: row.try_get("transaction_type")?,
            amount: row.try_get("amount")?,
            balance_after: row.try_get("balance_after")?,
            description: row.try_get("description")?,
            payment_id: row.try_get("payment_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<TransactionRow> for TokenTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let transaction_type: TransactionType = row
            .transaction_type
            .parse()
            .map_err(|e| corrupt("token_transactions.transaction_type", e))?;
        Ok(TokenTransaction {
            id: TransactionId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            transaction_type,
            amount: row.amount,
            balance_after: row.balance_after,
            description: row.description,
            payment_id: row.payment_id.map(PaymentId::from_uuid),
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn balance(&self, user_id: UserId) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT balance FROM user_tokens WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("balance", e))?;

        row.map(|r| r.try_get::<i64, _>("balance"))
            .transpose()
            .map_err(|e| map_sqlx_error("balance", e))
    }

    #[instrument(
        skip(self, entry),
        fields(
            user_id = %entry.user_id,
            transaction_type = %entry.transaction_type,
            delta = entry.delta
        ),
        err
    )]
    async fn adjust_balance(&self, entry: &LedgerEntry, at: DateTime<Utc>) -> Result<AdjustOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO user_tokens (user_id, balance, created_at, updated_at)
            VALUES ($1, 0, $2, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(entry.user_id.as_uuid())
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("ensure_balance_row", e))?;

        let balance: i64 = sqlx::query("SELECT balance FROM user_tokens WHERE user_id = $1 FOR UPDATE")
            .bind(entry.user_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get("balance"))
            .map_err(|e| map_sqlx_error("lock_balance", e))?;

        if let (TransactionType::Purchase, Some(payment_id)) = (entry.transaction_type, entry.payment_id) {
            lock_payment(&mut *tx, payment_id).await?;

            let refused = if find_purchase(&mut *tx, payment_id).await?.is_some() {
                Some(AdjustOutcome::Duplicate { balance })
            } else if is_voided(&mut *tx, payment_id).await? {
                Some(AdjustOutcome::Voided { payment_id, balance })
            } else {
                None
            };
            if let Some(outcome) = refused {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Ok(outcome);
            }
        }

        let account = TokenAccount::from_snapshot(entry.user_id, balance);
        let planned = match account.plan(entry, TransactionId::new(), at) {
            Ok(planned) => planned,
            Err(LedgerError::InsufficientTokens { available, .. }) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Ok(AdjustOutcome::Insufficient { balance: available });
            }
            Err(other) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(StoreError::Conflict(other.to_string()));
            }
        };

        sqlx::query(
            r#"
            INSERT INTO token_transactions (
                id,
                user_id,
                transaction_type,
                amount,
                balance_after,
                description,
                payment_id,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(planned.id.as_uuid())
        .bind(planned.user_id.as_uuid())
        .bind(planned.transaction_type.as_str())
        .bind(planned.amount)
        .bind(planned.balance_after)
        .bind(&planned.description)
        .bind(planned.payment_id.map(uuid::Uuid::from))
        .bind(planned.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;

        sqlx::query("UPDATE user_tokens SET balance = $2, updated_at = $3 WHERE user_id = $1")
            .bind(entry.user_id.as_uuid())
            .bind(planned.balance_after)
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_balance", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(AdjustOutcome::Applied(planned))
    }

    #[instrument(skip(self), fields(payment_id = %payment_id), err)]
    async fn void_purchase(
        &self,
        payment_id: PaymentId,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenTransaction>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        lock_payment(&mut *tx, payment_id).await?;

        if let Some(purchase) = find_purchase(&mut *tx, payment_id).await? {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(Some(purchase));
        }

        sqlx::query(
            r#"
            INSERT INTO voided_payments (payment_id, voided_at)
            VALUES ($1, $2)
            ON CONFLICT (payment_id) DO NOTHING
            "#,
        )
        .bind(payment_id.as_uuid())
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("void_purchase", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(None)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TokenTransaction>, StoreError> {
        let sql = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM token_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(to_i64(limit))
            .bind(to_i64(offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("transactions", e))?;

        rows.iter()
            .map(|row| {
                TransactionRow::from_row(row)
                    .map_err(|e| map_sqlx_error("transactions", e))
                    .and_then(TokenTransaction::try_from)
            })
            .collect()
    }
}

// Payments

#[derive(Debug, Clone)]
pub struct PostgresPaymentStore {
    pool: Arc<PgPool>,
}

impl PostgresPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

const PAYMENT_COLUMNS: &str = "id, user_id, provider, order_id, amount_minor, currency, status, \
     tokens_purchased, package_id, metadata, created_at, updated_at";

#[derive(Debug)]
struct PaymentRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    provider: String,
    order_id: String,
    amount_minor: i64,
    currency: String,
    status: String,
    tokens_purchased: i64,
    package_id: String,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for PaymentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PaymentRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            provider: row.try_get("provider")?,
            order_id: row.try_get("order_id")?,
            amount_minor: row.try_get("amount_minor")?,
            currency: row.try_get("currency")?,
            status: row.try_get("status")?,
            tokens_purchased: row.try_get("tokens_purchased")?,
            package_id: row.try_get("package_id")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let currency: Currency = row.currency.parse().map_err(|e| corrupt("payments.currency", e))?;
        let metadata = match row.metadata {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(corrupt("payments.metadata", format!("expected object, got {other}"))),
        };
        Ok(PaymentRecord {
            id: PaymentId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            provider: row.provider.parse().map_err(|e| corrupt("payments.provider", e))?,
            order_id: row.order_id,
            amount: Money {
                amount_minor: row.amount_minor,
                currency,
            },
            status: row.status.parse().map_err(|e| corrupt("payments.status", e))?,
            tokens_purchased: row.tokens_purchased,
            package_id: row.package_id,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_payment(operation: &str, row: &PgRow) -> Result<PaymentRecord, StoreError> {
    PaymentRow::from_row(row)
        .map_err(|e| map_sqlx_error(operation, e))
        .and_then(PaymentRecord::try_from)
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    #[instrument(skip(self, record), fields(order_id = %record.order_id, user_id = %record.user_id), err)]
    async fn insert(&self, record: &PaymentRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, user_id, provider, order_id, amount_minor, currency, status,
                tokens_purchased, package_id, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.user_id.as_uuid())
        .bind(record.provider.as_str())
        .bind(&record.order_id)
        .bind(record.amount.amount_minor)
        .bind(record.amount.currency.code())
        .bind(record.status.as_str())
        .bind(record.tokens_purchased)
        .bind(&record.package_id)
        .bind(Value::Object(record.metadata.clone()))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_payment", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PaymentRecord>, StoreError> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1");
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_order_id", e))?;

        row.map(|r| decode_payment("find_by_order_id", &r)).transpose()
    }

    #[instrument(skip(self, metadata), fields(payment_id = %id, from = %from, to = %to), err)]
    async fn transition(
        &self,
        id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        metadata: Map<String, Value>,
        at: DateTime<Utc>,
    ) -> Result<PaymentRecord, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::Conflict(format!(
                "illegal payment status transition {from} -> {to}"
            )));
        }

        let sql = format!(
            r#"
            UPDATE payments
            SET status = $3, metadata = metadata || $4::jsonb, updated_at = $5
            WHERE id = $1 AND status = $2
            RETURNING {PAYMENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(Value::Object(metadata))
            .bind(at)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("transition_payment", e))?;

        if let Some(row) = row {
            return decode_payment("transition_payment", &row);
        }

        let current = sqlx::query("SELECT status FROM payments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("transition_payment", e))?;
        match current {
            None => Err(StoreError::NotFound(format!("payment {id}"))),
            Some(row) => {
                let status: String = row
                    .try_get("status")
                    .map_err(|e| map_sqlx_error("transition_payment", e))?;
                Err(StoreError::Conflict(format!(
                    "payment {id} is {status}, expected {from}"
                )))
            }
        }
    }

    #[instrument(skip(self, metadata), fields(payment_id = %id), err)]
    async fn attach_metadata(
        &self,
        id: PaymentId,
        metadata: Map<String, Value>,
        at: DateTime<Utc>,
    ) -> Result<PaymentRecord, StoreError> {
        let sql = format!(
            r#"
            UPDATE payments
            SET metadata = metadata || $2::jsonb, updated_at = $3
            WHERE id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(Value::Object(metadata))
            .bind(at)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("attach_metadata", e))?;

        match row {
            Some(row) => decode_payment("attach_metadata", &row),
            None => Err(StoreError::NotFound(format!("payment {id}"))),
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(to_i64(limit))
            .bind(to_i64(offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_payments", e))?;

        rows.iter().map(|r| decode_payment("list_payments", r)).collect()
    }
}

// Uploads

#[derive(Debug, Clone)]
pub struct PostgresUploadStore {
    pool: Arc<PgPool>,
}

impl PostgresUploadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    async fn select(&self, operation: &str, sql: &str, cutoff: DateTime<Utc>) -> Result<Vec<UploadRow>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(cutoff)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        rows.iter()
            .map(|row| {
                UploadDbRow::from_row(row)
                    .map_err(|e| map_sqlx_error(operation, e))
                    .and_then(UploadRow::try_from)
            })
            .collect()
    }
}

#[derive(Debug)]
struct UploadDbRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    project_id: Option<uuid::Uuid>,
    object_path: Option<String>,
    size_bytes: Option<i64>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for UploadDbRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UploadDbRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            project_id: row.try_get("project_id")?,
            object_path: row.try_get("object_path")?,
            size_bytes: row.try_get("size_bytes")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<UploadDbRow> for UploadRow {
    type Error = StoreError;

    fn try_from(row: UploadDbRow) -> Result<Self, Self::Error> {
        let size_bytes = row
            .size_bytes
            .map(u64::try_from)
            .transpose()
            .map_err(|e| corrupt("image_uploads.size_bytes", e))?;
        Ok(UploadRow {
            id: UploadId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            project_id: row.project_id.map(ProjectId::from_uuid),
            object_path: row.object_path,
            size_bytes,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl UploadStore for PostgresUploadStore {
    #[instrument(skip(self, row), fields(upload_id = %row.id), err)]
    async fn insert(&self, row: &UploadRow) -> Result<(), StoreError> {
        let size_bytes = row
            .size_bytes
            .map(i64::try_from)
            .transpose()
            .map_err(|e| StoreError::Conflict(format!("size_bytes out of range: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO image_uploads (id, user_id, project_id, object_path, size_bytes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(row.id.as_uuid())
        .bind(row.user_id.as_uuid())
        .bind(row.project_id.map(uuid::Uuid::from))
        .bind(&row.object_path)
        .bind(size_bytes)
        .bind(row.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_upload", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn stale_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadRow>, StoreError> {
        self.select(
            "stale_uploads",
            r#"
            SELECT id, user_id, project_id, object_path, size_bytes, created_at
            FROM image_uploads
            WHERE created_at < $1 AND object_path IS NOT NULL
            ORDER BY created_at ASC
            "#,
            cutoff,
        )
        .await
    }

    #[instrument(skip(self), err)]
    async fn failed_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadRow>, StoreError> {
        self.select(
            "failed_uploads",
            r#"
            SELECT id, user_id, project_id, object_path, size_bytes, created_at
            FROM image_uploads
            WHERE created_at < $1 AND object_path IS NULL
            ORDER BY created_at ASC
            "#,
            cutoff,
        )
        .await
    }

    #[instrument(skip(self), fields(upload_id = %id), err)]
    async fn delete_upload(&self, id: UploadId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM image_uploads WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_upload", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %user_id, project_id = %project_id), err)]
    async fn delete_for_object(
        &self,
        user_id: UserId,
        project_id: ProjectId,
        object_path: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM image_uploads WHERE user_id = $1 AND project_id = $2 AND object_path = $3",
        )
        .bind(user_id.as_uuid())
        .bind(project_id.as_uuid())
        .bind(object_path)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_for_object", e))?;
        Ok(result.rows_affected())
    }
}
