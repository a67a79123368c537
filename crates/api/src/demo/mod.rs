//! The `OrderFulfillment` demo saga.
//!
//! Three local steps run against in-memory services:
//! `reserve_inventory` (compensated by releasing the reservation),
//! `process_payment` (compensated by a refund) and `create_shipment`.
//! Every endpoint answers on its own pair of response channels so a
//! response can only ever advance the step it belongs to.
//!
//! Handlers validate against the services right away, so a refusal turns
//! into a failure response. The service call itself is staged on the
//! transaction and runs only when the step's unit of work commits.

pub mod inventory;
pub mod payment;
pub mod shipping;

use std::sync::Arc;

use message_relay::ChannelRegistry;
use outbox::{Executable, InMemoryMessageRepository, InMemoryTx, Message};
use saga::{
    BasicSession, DefinitionBuilder, InMemorySessionRepository, LocalEndpoint, LocalHandler,
    MessageConstructor, Registry, RegistryChannel, Saga, SagaError, Session, SessionArgs,
    SessionFactory,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ApiError;

pub use inventory::{InMemoryInventoryService, InventoryService, ReservationItem};
pub use payment::{InMemoryPaymentService, PaymentService};
pub use shipping::{InMemoryShippingService, ShippingService};

pub const SAGA_NAME: &str = "OrderFulfillment";

/// The order carried by an `OrderFulfillment` session.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderDetails {
    pub customer_id: String,
    #[serde(default)]
    pub items: Vec<ReservationItem>,
    pub amount_cents: i64,
    #[serde(default)]
    pub address: String,
}

impl OrderDetails {
    pub fn from_session(session: &BasicSession) -> Result<Self, SagaError> {
        Ok(serde_json::from_value(Value::Object(session.data().clone()))?)
    }
}

/// Session factory that rejects start arguments which are not an order.
pub fn order_session_factory() -> SessionFactory<BasicSession> {
    Arc::new(|args: SessionArgs| {
        let session = BasicSession::from_args(args)?;
        OrderDetails::from_session(&session)
            .map_err(|e| SagaError::SessionCreationFailed(e.to_string()))?;
        Ok(session)
    })
}

/// The services the demo saga's local steps call.
#[derive(Debug, Clone, Default)]
pub struct DemoServices {
    pub inventory: InMemoryInventoryService,
    pub payment: InMemoryPaymentService,
    pub shipping: InMemoryShippingService,
}

impl DemoServices {
    /// Services with a few products in stock.
    pub fn seeded() -> Self {
        let services = Self::default();
        services.inventory.set_stock("SKU-001", 100);
        services.inventory.set_stock("SKU-002", 50);
        services.inventory.set_stock("SKU-003", 10);
        services
    }
}

/// Builds the `OrderFulfillment` saga, registering its response channels
/// with the relay.
pub fn order_fulfillment_saga(
    registry: &Arc<Registry<InMemoryTx>>,
    channels: &ChannelRegistry<InMemoryTx>,
    sessions: &InMemorySessionRepository<BasicSession>,
    services: &DemoServices,
) -> Result<Saga<BasicSession, InMemoryTx>, ApiError> {
    let wiring = Wiring { registry, channels };

    let inventory = services.inventory.clone();
    let reserve = wiring.endpoint(
        "inventory.reserve",
        local_handler(move |s| {
            let order = OrderDetails::from_session(s)?;
            inventory.check_availability(&order.items)?;
            let (inventory, id) = (inventory.clone(), s.id().clone());
            Ok(on_commit(move || {
                let reservation = inventory.reserve(&id, &order.items)?;
                tracing::info!(session_id = %id, reservation_id = %reservation.reservation_id, "inventory reserved");
                Ok(())
            }))
        }),
    )?;

    let inventory = services.inventory.clone();
    let release = wiring.endpoint(
        "inventory.release",
        local_handler(move |s| {
            let (inventory, id) = (inventory.clone(), s.id().clone());
            Ok(on_commit(move || {
                inventory.release(&id)?;
                tracing::info!(session_id = %id, "inventory released");
                Ok(())
            }))
        }),
    )?;

    let payment = services.payment.clone();
    let charge = wiring.endpoint(
        "payment.charge",
        local_handler(move |s| {
            let order = OrderDetails::from_session(s)?;
            payment.authorize(order.amount_cents)?;
            let (payment, id) = (payment.clone(), s.id().clone());
            Ok(on_commit(move || {
                let result = payment.charge(&id, &order.customer_id, order.amount_cents)?;
                tracing::info!(session_id = %id, payment_id = %result.payment_id, "payment charged");
                Ok(())
            }))
        }),
    )?;

    let payment = services.payment.clone();
    let refund = wiring.endpoint(
        "payment.refund",
        local_handler(move |s| {
            let (payment, id) = (payment.clone(), s.id().clone());
            Ok(on_commit(move || {
                payment.refund(&id)?;
                tracing::info!(session_id = %id, "payment refunded");
                Ok(())
            }))
        }),
    )?;

    let shipping = services.shipping.clone();
    let ship = wiring.endpoint(
        "shipping.create",
        local_handler(move |s| {
            let order = OrderDetails::from_session(s)?;
            shipping.validate_address(&order.address)?;
            let (shipping, id) = (shipping.clone(), s.id().clone());
            Ok(on_commit(move || {
                let shipment = shipping.create_shipment(&id, &order.address)?;
                tracing::info!(session_id = %id, tracking_number = %shipment.tracking_number, "shipment created");
                Ok(())
            }))
        }),
    )?;

    let definition = DefinitionBuilder::new()
        .step("reserve_inventory")
        .local_invoke(reserve)
        .with_local_compensation(release)
        .step("process_payment")
        .local_invoke(charge)
        .with_local_compensation(refund)
        .step("create_shipment")
        .local_invoke(ship)
        .build()?;

    Ok(Saga::new(
        SAGA_NAME,
        definition,
        order_session_factory(),
        Arc::new(sessions.clone()),
    ))
}

struct Wiring<'a> {
    registry: &'a Arc<Registry<InMemoryTx>>,
    channels: &'a ChannelRegistry<InMemoryTx>,
}

impl Wiring<'_> {
    /// A local endpoint answering on `<name>.succeeded` and `<name>.failed`.
    fn endpoint(
        &self,
        name: &str,
        handler: LocalHandler<BasicSession, InMemoryTx>,
    ) -> Result<LocalEndpoint<BasicSession, InMemoryTx>, ApiError> {
        let success_channel = format!("{name}.succeeded");
        let failure_channel = format!("{name}.failed");
        let success = self.response_channel(&success_channel)?;
        let failure = self.response_channel(&failure_channel)?;

        Ok(LocalEndpoint::new(
            success_channel.as_str(),
            response(&success_channel),
            Arc::new(success),
            failure_channel.as_str(),
            response(&failure_channel),
            Arc::new(failure),
            handler,
        ))
    }

    fn response_channel(&self, name: &str) -> Result<InMemoryMessageRepository, ApiError> {
        let repository = InMemoryMessageRepository::new();
        self.channels.register_channel(RegistryChannel::new(
            name,
            Arc::clone(self.registry),
            Arc::new(repository.clone()),
        ))?;
        Ok(repository)
    }
}

/// Wraps a handler that validates the session and returns the deferred effect.
fn local_handler<F>(handler: F) -> LocalHandler<BasicSession, InMemoryTx>
where
    F: Fn(&BasicSession) -> saga::Result<Executable<InMemoryTx>> + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Stages a service call on the transaction so it only happens if the
/// step's unit of work commits.
fn on_commit<F>(effect: F) -> Executable<InMemoryTx>
where
    F: FnOnce() -> saga::Result<()> + Send + 'static,
{
    Executable::new(move |tx: &mut InMemoryTx| {
        Box::pin(async move {
            tx.stage(async move {
                if let Err(e) = effect() {
                    tracing::error!(error = %e, "committed service call failed");
                }
            });
            Ok(())
        })
    })
}

fn response(trigger: &str) -> MessageConstructor<BasicSession> {
    let trigger = trigger.to_string();
    Arc::new(move |s: &BasicSession| {
        Message::new(s.id().clone(), trigger.clone()).with_payload_raw(json!({
            "step": s.current_step(),
            "state": s.state().as_str(),
        }))
    })
}
