//! Payment service used by the demo saga.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use common::SessionId;
use saga::SagaError;

/// Result of a successful payment charge.
#[derive(Debug, Clone)]
pub struct PaymentResult {
    pub payment_id: String,
}

/// Payment operations keyed by the order's session.
pub trait PaymentService: Send + Sync {
    /// Fails if a charge of `amount_cents` would be declined.
    fn authorize(&self, amount_cents: i64) -> Result<(), SagaError>;

    /// Charges a customer for an order.
    fn charge(
        &self,
        order: &SessionId,
        customer_id: &str,
        amount_cents: i64,
    ) -> Result<PaymentResult, SagaError>;

    /// Refunds the order's payment, if any.
    fn refund(&self, order: &SessionId) -> Result<(), SagaError>;
}

#[derive(Debug)]
struct InMemoryPaymentState {
    payments: HashMap<SessionId, (String, String, i64)>,
    next_id: u32,
    limit_cents: i64,
    fail_on_charge: bool,
}

/// In-memory payment service that declines charges above a limit.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Default per-order limit: 1000.00.
    pub const DEFAULT_LIMIT_CENTS: i64 = 100_000;

    pub fn new() -> Self {
        Self::with_limit(Self::DEFAULT_LIMIT_CENTS)
    }

    pub fn with_limit(limit_cents: i64) -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryPaymentState {
                payments: HashMap::new(),
                next_id: 0,
                limit_cents,
                fail_on_charge: false,
            })),
        }
    }

    pub fn set_fail_on_charge(&self, fail: bool) {
        self.write().fail_on_charge = fail;
    }

    pub fn payment_count(&self) -> usize {
        self.read().payments.len()
    }

    pub fn has_payment(&self, order: &SessionId) -> bool {
        self.read().payments.contains_key(order)
    }

    /// Sum of every payment that has not been refunded.
    pub fn total_charged_cents(&self) -> i64 {
        self.read().payments.values().map(|(_, _, amount)| amount).sum()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryPaymentState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryPaymentState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for InMemoryPaymentService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPaymentState {
    fn check(&self, amount_cents: i64) -> Result<(), SagaError> {
        if self.fail_on_charge {
            return Err(step_failed("Payment service unavailable".to_string()));
        }
        if amount_cents <= 0 {
            return Err(step_failed(format!("Invalid amount: {amount_cents}")));
        }
        if amount_cents > self.limit_cents {
            return Err(step_failed(format!(
                "Payment declined: {amount_cents} exceeds limit {}",
                self.limit_cents
            )));
        }
        Ok(())
    }
}

impl PaymentService for InMemoryPaymentService {
    fn authorize(&self, amount_cents: i64) -> Result<(), SagaError> {
        self.read().check(amount_cents)
    }

    fn charge(
        &self,
        order: &SessionId,
        customer_id: &str,
        amount_cents: i64,
    ) -> Result<PaymentResult, SagaError> {
        let mut state = self.write();

        state.check(amount_cents)?;
        if let Some((payment_id, _, _)) = state.payments.get(order) {
            return Ok(PaymentResult {
                payment_id: payment_id.clone(),
            });
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state.payments.insert(
            order.clone(),
            (payment_id.clone(), customer_id.to_string(), amount_cents),
        );

        Ok(PaymentResult { payment_id })
    }

    fn refund(&self, order: &SessionId) -> Result<(), SagaError> {
        self.write().payments.remove(order);
        Ok(())
    }
}

fn step_failed(reason: String) -> SagaError {
    SagaError::StepFailed {
        step: "process_payment".to_string(),
        reason,
    }
}
