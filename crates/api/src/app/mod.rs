//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection, seeding and the shared service bundle
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request/response DTOs, envelopes and body extractors
//! - `errors.rs`: the single failure translator

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    let api = routes::public()
        .merge(routes::protected(services.clone()))
        .layer(ServiceBuilder::new().layer(Extension(services)));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/v1", api)
        .fallback(routes::system::not_found)
}
