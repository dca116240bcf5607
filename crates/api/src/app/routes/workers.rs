//! Worker registration and lifecycle endpoints.
//!
//! Self-service routes act on the calling worker, identified by its session.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use tollgate_auth::{Principal, RouteConfig};
use tollgate_core::{WorkerId, WorkerStatus};
use tollgate_fleet::{DisableOutcome, RegistrationForm, Worker};

use crate::app::dto::{DisableResponse, ListWorkersQuery, TransitionResponse};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestPrincipal;
use crate::middleware::{guarded, AuthState};

pub fn router(auth: &AuthState) -> Router {
    let worker_only = RouteConfig::authenticated().worker();

    Router::new()
        .route(
            "/worker",
            post(register).merge(guarded(auth, RouteConfig::authenticated(), get(list))),
        )
        .route("/worker/refresh", guarded(auth, worker_only, post(refresh)))
        .route("/worker/checking", guarded(auth, worker_only, post(checking)))
        .route("/worker/waiting", guarded(auth, worker_only, post(waiting)))
        .route("/worker/unregister", guarded(auth, worker_only, post(unregister)))
        .route(
            "/worker/:id/disable",
            guarded(auth, RouteConfig::authenticated().hatchery().admin(), post(disable)),
        )
}

async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Json(form): Json<RegistrationForm>,
) -> Result<Json<Worker>, ApiError> {
    let worker = services.lifecycle.register(form).await?;
    Ok(Json(worker))
}

async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ListWorkersQuery>,
) -> Result<Json<Vec<Worker>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<WorkerStatus>)
        .transpose()?;
    Ok(Json(services.lifecycle.list_workers(status).await?))
}

async fn refresh(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<RequestPrincipal>,
) -> Result<StatusCode, ApiError> {
    services.lifecycle.heartbeat(calling_worker(&principal)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn checking(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<RequestPrincipal>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let t = services.lifecycle.mark_checking(calling_worker(&principal)?).await?;
    Ok(Json(t.into()))
}

async fn waiting(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<RequestPrincipal>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let t = services.lifecycle.mark_waiting(calling_worker(&principal)?).await?;
    Ok(Json(t.into()))
}

async fn unregister(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<RequestPrincipal>,
) -> Result<StatusCode, ApiError> {
    services.lifecycle.unregister(calling_worker(&principal)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disable(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<DisableResponse>), ApiError> {
    let id: WorkerId = id.parse()?;
    let outcome = services.lifecycle.disable(id).await?;
    let status = match outcome {
        DisableOutcome::Disabled => StatusCode::OK,
        _ => StatusCode::ACCEPTED,
    };
    Ok((status, Json(DisableResponse::new(id, &outcome))))
}

fn calling_worker(principal: &RequestPrincipal) -> Result<WorkerId, ApiError> {
    match principal.principal() {
        Principal::Worker(w) => Ok(w.id),
        _ => Err(ApiError::forbidden("worker only")),
    }
}
