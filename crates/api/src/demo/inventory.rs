//! Inventory service used by the demo saga.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use common::SessionId;
use saga::SagaError;
use serde::{Deserialize, Serialize};

/// An item to reserve in inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    pub product_id: String,
    pub quantity: u32,
}

/// Result of a successful inventory reservation.
#[derive(Debug, Clone)]
pub struct ReservationResult {
    pub reservation_id: String,
}

/// Inventory operations keyed by the order's session.
pub trait InventoryService: Send + Sync {
    /// Fails if any item is short of stock.
    fn check_availability(&self, items: &[ReservationItem]) -> Result<(), SagaError>;

    /// Reserves stock for every item, or nothing if any item is short.
    fn reserve(
        &self,
        order: &SessionId,
        items: &[ReservationItem],
    ) -> Result<ReservationResult, SagaError>;

    /// Releases the order's reservation and returns its stock.
    fn release(&self, order: &SessionId) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    stock: HashMap<String, u32>,
    reservations: HashMap<SessionId, (String, Vec<ReservationItem>)>,
    next_id: u32,
    fail_on_reserve: bool,
}

/// In-memory inventory with per-product stock levels.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stock level of a product.
    pub fn set_stock(&self, product_id: impl Into<String>, quantity: u32) {
        self.write().stock.insert(product_id.into(), quantity);
    }

    pub fn stock(&self, product_id: &str) -> u32 {
        self.read().stock.get(product_id).copied().unwrap_or(0)
    }

    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.write().fail_on_reserve = fail;
    }

    pub fn reservation_count(&self) -> usize {
        self.read().reservations.len()
    }

    pub fn has_reservation(&self, order: &SessionId) -> bool {
        self.read().reservations.contains_key(order)
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryInventoryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryInventoryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl InMemoryInventoryState {
    fn check(&self, items: &[ReservationItem]) -> Result<(), SagaError> {
        if self.fail_on_reserve {
            return Err(step_failed("Inventory service unavailable"));
        }
        for item in items {
            let available = self.stock.get(&item.product_id).copied().unwrap_or(0);
            if available < item.quantity {
                return Err(step_failed(format!(
                    "Insufficient stock for {}: requested {}, available {}",
                    item.product_id, item.quantity, available
                )));
            }
        }
        Ok(())
    }
}

impl InventoryService for InMemoryInventoryService {
    fn check_availability(&self, items: &[ReservationItem]) -> Result<(), SagaError> {
        self.read().check(items)
    }

    fn reserve(
        &self,
        order: &SessionId,
        items: &[ReservationItem],
    ) -> Result<ReservationResult, SagaError> {
        let mut state = self.write();

        if let Some((reservation_id, _)) = state.reservations.get(order) {
            return Ok(ReservationResult {
                reservation_id: reservation_id.clone(),
            });
        }
        state.check(items)?;

        for item in items {
            if let Some(level) = state.stock.get_mut(&item.product_id) {
                *level -= item.quantity;
            }
        }
        state.next_id += 1;
        let reservation_id = format!("RES-{:04}", state.next_id);
        state
            .reservations
            .insert(order.clone(), (reservation_id.clone(), items.to_vec()));

        Ok(ReservationResult { reservation_id })
    }

    fn release(&self, order: &SessionId) -> Result<(), SagaError> {
        let mut state = self.write();
        if let Some((_, items)) = state.reservations.remove(order) {
            for item in items {
                *state.stock.entry(item.product_id).or_insert(0) += item.quantity;
            }
        }
        Ok(())
    }
}

fn step_failed(reason: impl Into<String>) -> SagaError {
    SagaError::StepFailed {
        step: "reserve_inventory".to_string(),
        reason: reason.into(),
    }
}
