//! Infrastructure layer: retry, datastores, object storage, payment gateways
//! and the services built on top of them.

pub mod cleanup;
pub mod clock;
pub mod config;
pub mod gateway;
pub mod retry;
pub mod services;
pub mod storage;
pub mod store;

pub use cleanup::{
    CleanupCategory, CleanupConfig, CleanupError, CleanupItemError, CleanupReport, CleanupStats, StorageCleanupScheduler,
    StorageUsage,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use gateway::{GatewayError, GatewayRegistry, MockGateway, PaymentGateway};
pub use retry::{AttemptError, FailureKind, RetryExecutor, RetryPolicy, Retryable};
pub use services::payments::{PaymentError, PaymentReconciler, PaymentResponse, PaymentResult};
pub use services::tokens::{TokenError, TokenLedger};
pub use storage::{ObjectStorage, ObjectStoreStorage, StorageError, StorageObject};
pub use store::{AdjustOutcome, LedgerStore, PaymentStore, StoreError, UploadRow, UploadStore};
