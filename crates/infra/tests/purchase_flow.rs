//! End-to-end flows over the in-memory adapters.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;

use clipcredit_core::{ProjectId, UploadId, UserId};
use clipcredit_infra::storage::upload_path;
use clipcredit_infra::store::{InMemoryLedgerStore, InMemoryPaymentStore, InMemoryUploadStore};
use clipcredit_infra::{
    CleanupConfig, Clock, GatewayRegistry, ManualClock, MockGateway, ObjectStorage, ObjectStoreStorage, PaymentError,
    PaymentReconciler, StorageCleanupScheduler, SystemClock, TokenLedger, UploadRow, UploadStore,
};
use clipcredit_ledger::{LedgerError, TransactionType};
use clipcredit_payments::{PaymentProvider, PaymentStatus};

fn reconciler() -> (PaymentReconciler, TokenLedger) {
    let clock = Arc::new(SystemClock);
    let tokens = TokenLedger::new(InMemoryLedgerStore::arc(), clock.clone());
    let gateways = GatewayRegistry::new().with_gateway(MockGateway::arc());
    let payments = PaymentReconciler::new(InMemoryPaymentStore::arc(), tokens.clone(), gateways, clock);
    (payments, tokens)
}

#[tokio::test]
async fn purchase_then_spend() {
    let (payments, tokens) = reconciler();
    let user = UserId::new();

    let order = payments
        .create_order(user, "standard", PaymentProvider::Mock)
        .await
        .unwrap();
    assert_eq!(order.amount, "25.00");
    assert_eq!(order.currency, "USD");
    assert_eq!(order.tokens, 425);

    let result = payments.capture_payment(user, &order.order_id).await.unwrap();
    assert_eq!(result.status, PaymentStatus::Succeeded);
    assert_eq!(result.new_balance, 425);
    assert!(result.transaction_id.is_some());

    assert_eq!(tokens.debit(user, 400, "render").await.unwrap(), 25);
    assert!(matches!(
        tokens.debit(user, 26, "render").await,
        Err(clipcredit_infra::TokenError::Ledger(LedgerError::InsufficientTokens {
            available: 25,
            requested: 26
        }))
    ));

    let log = tokens.list_transactions(user, 10, 0).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].transaction_type, TransactionType::Purchase);
    assert_eq!(log[1].payment_id, Some(order.payment_id));
    assert_eq!(log.iter().map(|t| t.amount).sum::<i64>(), 25);

    let history = payments.get_payment_history(user, 10, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, PaymentStatus::Succeeded);
    assert_eq!(history[0].transaction_id, result.transaction_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_captures_credit_once() {
    let (payments, tokens) = reconciler();
    let user = UserId::new();
    let order = payments.create_order(user, "basic", PaymentProvider::Mock).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let payments = payments.clone();
            let order_id = order.order_id.clone();
            tokio::spawn(async move { payments.capture_payment(user, &order_id).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(result) => {
                assert_eq!(result.new_balance, 160);
                succeeded += 1;
            }
            Err(PaymentError::AlreadyFinalized { .. }) | Err(PaymentError::InvalidTransition(_)) => {}
            Err(other) => panic!("unexpected capture error: {other}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(tokens.get_balance(user).await.unwrap(), 160);
    let purchases = tokens.list_transactions(user, 10, 0).await.unwrap();
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].balance_after, 160);
}

#[tokio::test]
async fn cleanup_leaves_fresh_uploads_alone() {
    let storage = Arc::new(ObjectStoreStorage::in_memory());
    let uploads = InMemoryUploadStore::arc();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let user = UserId::new();

    let mut paths = Vec::new();
    for _ in 0..3 {
        let project = ProjectId::new();
        let path = upload_path("temp", user, project, "frame.png");
        storage
            .upload(Bytes::from_static(b"frame"), &path, "image/png")
            .await
            .unwrap();
        uploads
            .insert(&UploadRow {
                id: UploadId::new(),
                user_id: user,
                project_id: Some(project),
                object_path: Some(path.clone()),
                size_bytes: Some(5),
                created_at: clock.now(),
            })
            .await
            .unwrap();
        paths.push(path);
    }

    let scheduler = StorageCleanupScheduler::new(storage.clone(), uploads.clone(), clock.clone(), CleanupConfig::default());

    let stats = scheduler.cleanup().await.unwrap();
    assert_eq!(stats.total_removed(), 0);
    assert_eq!(uploads.len(), 3);

    clock.advance(chrono::Duration::hours(25));
    let stats = scheduler.cleanup().await.unwrap();
    assert_eq!(stats.temp_files_removed, 3);
    assert_eq!(stats.total_bytes_recovered, 15);
    assert!(uploads.is_empty());
    assert!(storage.list("temp").await.unwrap().is_empty());

    let report = scheduler.get_stats();
    assert_eq!(report.total_runs, 2);
    assert_eq!(report.successful_runs, 2);
}
