//! HTTP API for the saga engine.
//!
//! Starts sagas by name, exposes session state and lets operators trigger
//! a relay batch by hand, with structured logging (tracing) and Prometheus
//! metrics. The bundled `OrderFulfillment` saga runs entirely in memory.

pub mod config;
pub mod demo;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use message_relay::{ChannelRegistry, Relayer};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{InMemoryTx, InMemoryTxHandler, UnitOfWorkFactory};
use saga::{BasicSession, InMemorySessionRepository, Orchestrator, Registry};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use demo::DemoServices;
use error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub registry: Arc<Registry<InMemoryTx>>,
    pub relayer: Arc<Relayer<InMemoryTx>>,
    pub sessions: InMemorySessionRepository<BasicSession>,
    pub services: DemoServices,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/sagas", get(routes::sagas::list))
        .route("/sagas/{name}", post(routes::sagas::start))
        .route("/sessions/{id}", get(routes::sessions::get))
        .route("/relay/execute", post(routes::relay::execute))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the in-memory application state with the demo saga registered.
pub fn create_default_state(config: &Config) -> Result<Arc<AppState>, ApiError> {
    let uow_factory = UnitOfWorkFactory::new(Arc::new(InMemoryTxHandler::new()));
    let registry = Arc::new(Registry::new(Orchestrator::new(uow_factory.clone())));
    let channels = Arc::new(ChannelRegistry::new());
    let sessions = InMemorySessionRepository::new();
    let services = DemoServices::seeded();

    let saga = demo::order_fulfillment_saga(&registry, &channels, &sessions, &services)?;
    registry.register(saga)?;

    let relayer = Arc::new(Relayer::new(
        config.relay_batch_size,
        channels,
        uow_factory,
    )?);

    Ok(Arc::new(AppState {
        registry,
        relayer,
        sessions,
        services,
    }))
}
