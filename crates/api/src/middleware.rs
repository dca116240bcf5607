//! Authorization gate for every guarded route.
//!
//! Each route carries a [`RouteConfig`]; [`guarded`] wraps its handler with
//! [`authorize_request`], which resolves the caller, loads its effective
//! groups, and enforces the route's requirements before the handler runs.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, RawPathParams, Request, State},
    http::{HeaderMap, Method, header},
    middleware::Next,
    response::Response,
    routing::MethodRouter,
};
use tracing::{debug, warn};

use tollgate_auth::{
    Credentials, Decision, EffectiveGroupLoader, LoadedModels, PermissionResolver,
    PermissionStore, Principal, PrincipalKind, PrincipalResolver, RouteConfig, RouteParams,
    required_level, resource::params as param,
};
use tollgate_core::{JobId, ModelId};
use tollgate_fleet::{JobLookup, WorkerLifecycle};

use crate::app::errors::ApiError;
use crate::context::RequestPrincipal;

/// Hatchery identification (used with the `tollgate/hatchery` user agent).
pub const HATCHERY_UID_HEADER: &str = "x-tollgate-hatchery-uid";
/// Worker session (used with the `tollgate/worker` user agent).
pub const WORKER_SESSION_HEADER: &str = "x-tollgate-worker-session";

#[derive(Clone)]
pub struct AuthState {
    pub principals: Arc<PrincipalResolver>,
    pub groups: Arc<EffectiveGroupLoader>,
    pub permissions: Arc<PermissionResolver>,
    pub models: Arc<dyn PermissionStore>,
    pub jobs: Arc<dyn JobLookup>,
    pub lifecycle: WorkerLifecycle,
}

#[derive(Clone)]
struct Guard {
    state: AuthState,
    route: RouteConfig,
}

/// Attach the authorization gate, configured for this route, to a handler.
pub fn guarded(state: &AuthState, route: RouteConfig, handler: MethodRouter) -> MethodRouter {
    handler.route_layer(axum::middleware::from_fn_with_state(
        Guard {
            state: state.clone(),
            route,
        },
        authorize_request,
    ))
}

async fn authorize_request(
    State(guard): State<Guard>,
    path: Option<RawPathParams>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Guard { state, route } = guard;
    let credentials = extract_credentials(req.headers());

    let mut principal = None;
    if route.auth {
        match state.principals.resolve(&credentials).await {
            Ok(p) => principal = Some(p),
            Err(e) => {
                log_rejection(&req, &credentials, &e);
                return Err(ApiError::unauthorized("authorization denied"));
            }
        }
    }

    if let Some(p) = principal.as_mut() {
        if let Principal::Worker(w) = &*p {
            state.lifecycle.heartbeat(w.id).await?;
        }
        if let Err(e) = state.groups.augment(p).await {
            log_rejection(&req, &credentials, &e);
            return Err(ApiError::unauthorized("authorization denied"));
        }
    }

    if !route.auth {
        return Ok(next.run(req).await);
    }
    let Some(principal) = principal else {
        return Err(ApiError::unauthorized("unable to find connected principal"));
    };

    let params: RouteParams = path
        .as_ref()
        .map(|p| p.iter().collect())
        .unwrap_or_default();
    check_route(&state, &route, req.method(), &params, &principal).await?;

    invalidate_permission_cache(&state, &principal, req.method());
    req.extensions_mut().insert(RequestPrincipal::new(principal));
    Ok(next.run(req).await)
}

/// Route requirements, in order, first failure wins.
async fn check_route(
    state: &AuthState,
    route: &RouteConfig,
    method: &Method,
    params: &RouteParams,
    principal: &Principal,
) -> Result<(), ApiError> {
    if route.need_hatchery && principal.kind() == PrincipalKind::Hatchery {
        return Ok(());
    }

    if route.need_worker {
        return check_worker_job(state, route, params, principal).await;
    }

    if principal.is_admin() {
        return Ok(());
    }

    if route.need_admin {
        return Err(ApiError::forbidden("admin only"));
    }

    let required = required_level(method.as_str(), route.is_execution);
    let models = if state.permissions.has_universal_access(principal) {
        LoadedModels::new()
    } else {
        load_models(state, params).await?
    };
    match state.permissions.authorize(principal, params, required, &models) {
        Decision::Allow => {}
        Decision::Deny(reason) if reason.is_route_misconfiguration() => {
            return Err(ApiError::Misconfigured(reason.to_string()));
        }
        Decision::Deny(_) => return Err(ApiError::forbidden("not authorized")),
    }

    if route.need_username_or_admin {
        let own = principal.as_user().map(|u| u.username.as_str());
        if own.is_none() || own != params.get(param::USERNAME) {
            return Err(ApiError::forbidden("not authorized on this resource"));
        }
    }

    Ok(())
}

/// Worker-only routes: an execution on a job must come from the worker the
/// job was handed to.
async fn check_worker_job(
    state: &AuthState,
    route: &RouteConfig,
    params: &RouteParams,
    principal: &Principal,
) -> Result<(), ApiError> {
    let Some(worker) = principal.as_worker() else {
        return Err(ApiError::forbidden("worker only"));
    };

    let Some(raw) = params.get(param::JOB_ID) else {
        return Ok(());
    };
    let job_id: JobId = raw.parse().map_err(|_| {
        warn!(job_id = raw, "unable to parse job id");
        ApiError::forbidden("worker not authorized")
    })?;

    if !route.is_execution {
        return Ok(());
    }

    let job = state.jobs.load_job(job_id).await.map_err(|e| {
        warn!(%job_id, error = %e, "unable to load job");
        ApiError::forbidden("worker not authorized")
    })?;

    if job.worker_name != worker.name || job.worker_id != worker.id {
        warn!(%job_id, worker = %worker.name, assigned = %job.worker_name, "job taken by another worker");
        return Err(ApiError::forbidden("worker not authorized"));
    }
    Ok(())
}

/// Models referenced by the route, fetched up front so the resolver stays
/// free of IO. Unknown or malformed ids are left for the resolver to deny;
/// a storage failure denies outright.
async fn load_models(state: &AuthState, params: &RouteParams) -> Result<LoadedModels, ApiError> {
    let mut models = LoadedModels::new();
    let Some(id) = params.get(param::MODEL_ID).and_then(|v| v.parse::<ModelId>().ok()) else {
        return Ok(models);
    };
    match state.models.load_worker_model(id).await {
        Ok(model) => {
            models.insert(id, model);
        }
        Err(e) if e.is_not_found() => debug!(model_id = %id, "worker model not found"),
        Err(e) => {
            warn!(model_id = %id, error = %e, "unable to load worker model");
            return Err(ApiError::forbidden("not authorized"));
        }
    }
    Ok(models)
}

/// Mutations by users may change group memberships or permissions, so cached
/// snapshots are dropped before the handler runs.
fn invalidate_permission_cache(state: &AuthState, principal: &Principal, method: &Method) {
    if principal.kind() != PrincipalKind::User {
        return;
    }
    if !matches!(*method, Method::POST | Method::PUT | Method::DELETE) {
        return;
    }
    if let Some(cache) = state.groups.cache() {
        cache.invalidate_all();
    }
}

fn extract_credentials(headers: &HeaderMap) -> Credentials {
    Credentials {
        user_agent: header_value(headers, header::USER_AGENT.as_str()),
        authorization: header_value(headers, header::AUTHORIZATION.as_str()),
        hatchery_uid: header_value(headers, HATCHERY_UID_HEADER),
        worker_session: header_value(headers, WORKER_SESSION_HEADER),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn log_rejection(req: &Request, credentials: &Credentials, err: &tollgate_auth::AuthError) {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let agent = credentials.user_agent.as_deref().unwrap_or("");

    if err.is_unauthorized() {
        warn!(method = %req.method(), uri = %req.uri(), remote, agent, error = %err, "authorization denied");
    } else {
        tracing::error!(method = %req.method(), uri = %req.uri(), remote, agent, error = %err, "authorization failed on storage error");
    }
}
