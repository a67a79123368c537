//! Shipping service used by the demo saga.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use common::SessionId;
use saga::SagaError;

/// Result of a successful shipment creation.
#[derive(Debug, Clone)]
pub struct ShipmentResult {
    pub tracking_number: String,
}

/// Shipping operations keyed by the order's session.
pub trait ShippingService: Send + Sync {
    /// Fails if a shipment to `address` cannot be created.
    fn validate_address(&self, address: &str) -> Result<(), SagaError>;

    fn create_shipment(
        &self,
        order: &SessionId,
        address: &str,
    ) -> Result<ShipmentResult, SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryShippingState {
    shipments: HashMap<SessionId, (String, String)>,
    next_id: u32,
    fail_on_create: bool,
}

/// In-memory shipping service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<RwLock<InMemoryShippingState>>,
}

impl InMemoryShippingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_create(&self, fail: bool) {
        self.write().fail_on_create = fail;
    }

    pub fn shipment_count(&self) -> usize {
        self.read().shipments.len()
    }

    /// Tracking number of the order's shipment.
    pub fn tracking_number(&self, order: &SessionId) -> Option<String> {
        self.read().shipments.get(order).map(|(tracking, _)| tracking.clone())
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryShippingState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryShippingState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl InMemoryShippingState {
    fn check(&self, address: &str) -> Result<(), SagaError> {
        if self.fail_on_create {
            return Err(step_failed("Shipping unavailable"));
        }
        if address.trim().is_empty() {
            return Err(step_failed("Shipping address is required"));
        }
        Ok(())
    }
}

impl ShippingService for InMemoryShippingService {
    fn validate_address(&self, address: &str) -> Result<(), SagaError> {
        self.read().check(address)
    }

    fn create_shipment(
        &self,
        order: &SessionId,
        address: &str,
    ) -> Result<ShipmentResult, SagaError> {
        let mut state = self.write();

        state.check(address)?;

        state.next_id += 1;
        let tracking_number = format!("TRACK-{:04}", state.next_id);
        state
            .shipments
            .insert(order.clone(), (tracking_number.clone(), address.to_string()));

        Ok(ShipmentResult { tracking_number })
    }
}

fn step_failed(reason: &str) -> SagaError {
    SagaError::StepFailed {
        step: "create_shipment".to_string(),
        reason: reason.to_string(),
    }
}
