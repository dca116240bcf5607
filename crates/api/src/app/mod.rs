//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: storage backends, auth stack, worker lifecycle
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: AppServices) -> Router {
    let guarded_routes = routes::router(&services.auth);

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(guarded_routes)
        .layer(ServiceBuilder::new().layer(Extension(Arc::new(services))))
}
