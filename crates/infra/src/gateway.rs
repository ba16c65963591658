//! Payment gateway capability and the built-in mock provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use clipcredit_payments::{CaptureOutcome, Money, PaymentProvider};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),

    #[error("payment provider not configured: {0}")]
    NotConfigured(PaymentProvider),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Open an order for `amount` and return the provider's order handle.
    async fn create_order(&self, amount: &Money, description: &str) -> Result<String, GatewayError>;

    /// Capture an approved order. Captures are final on the provider side.
    async fn capture_order(&self, order_id: &str) -> Result<CaptureOutcome, GatewayError>;
}

/// Provider that settles every order in-process.
#[derive(Debug, Default)]
pub struct MockGateway {
    decline_captures: AtomicBool,
    unavailable: AtomicBool,
    captures: AtomicU32,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make subsequent captures report a decline.
    pub fn decline_captures(&self, decline: bool) {
        self.decline_captures.store(decline, Ordering::SeqCst);
    }

    /// Make subsequent calls fail as if the provider were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of capture calls received so far.
    pub fn capture_calls(&self) -> u32 {
        self.captures.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("mock provider switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Mock
    }

    async fn create_order(&self, amount: &Money, description: &str) -> Result<String, GatewayError> {
        self.check_available()?;
        let order_id = format!("MOCK-ORDER-{}", Uuid::now_v7());
        info!(order_id = %order_id, amount = %amount, description, "mock order created");
        Ok(order_id)
    }

    async fn capture_order(&self, order_id: &str) -> Result<CaptureOutcome, GatewayError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.decline_captures.load(Ordering::SeqCst) {
            return Ok(CaptureOutcome::Declined {
                reason: format!("mock decline for {order_id}"),
            });
        }
        Ok(CaptureOutcome::Completed {
            transaction_id: format!("MOCK-TX-{}", Uuid::now_v7()),
        })
    }
}

/// Gateways by provider.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("providers", &self.gateways.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `gateway` under the provider it reports.
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.provider(), gateway);
        self
    }

    pub fn get(&self, provider: PaymentProvider) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or(GatewayError::NotConfigured(provider))
    }
}
