//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend selection (gateway, token store, broker) and consumer workers
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use intake_infra::IntakeConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router from configuration (public entrypoint used by `main.rs`).
///
/// Connects the configured backends and starts the in-process consumers, so
/// it must run inside a Tokio runtime.
pub async fn build_app(config: &IntakeConfig) -> anyhow::Result<(Router, Arc<AppServices>)> {
    let services = Arc::new(services::build_services(config).await?);
    services.start_consumers(config.consumers, tokio::runtime::Handle::current())?;
    Ok((build_router(services.clone()), services))
}

/// Router over already-wired services (tests inject their own).
pub fn build_router(services: Arc<AppServices>) -> Router {
    let kind = services.kind();

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router(kind))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::log_requests))
                .layer(Extension(services)),
        )
}
