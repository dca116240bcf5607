use axum::{routing::get, Router};

use tollgate_auth::RouteConfig;

use crate::middleware::{guarded, AuthState};

pub mod system;
pub mod workers;

/// Router for every guarded endpoint; each route declares its own requirements.
pub fn router(auth: &AuthState) -> Router {
    Router::new()
        .route(
            "/whoami",
            guarded(auth, RouteConfig::authenticated(), get(system::whoami)),
        )
        .merge(workers::router(auth))
}
