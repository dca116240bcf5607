use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use thiserror::Error;

use tollgate_core::{DomainError, StoreError};
use tollgate_fleet::FleetError;

/// Every failure a handler or the authorization middleware can surface.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("wrong request: {0}")]
    WrongRequest(String),

    #[error("route misconfigured: {0}")]
    Misconfigured(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn wrong_request(msg: impl Into<String>) -> Self {
        Self::WrongRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::WrongRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Misconfigured(_) | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            FleetError::Forbidden(msg) => ApiError::Forbidden(msg),
            FleetError::NotFound(id) => ApiError::NotFound(format!("worker {id}")),
            FleetError::WrongRequest(msg) => ApiError::WrongRequest(msg),
            FleetError::Store(e) => ApiError::Store(e),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::WrongRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let code = match &self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::WrongRequest(_) => "wrong_request",
            ApiError::Misconfigured(_) => "route_misconfigured",
            ApiError::Store(_) => "store_error",
        };
        if matches!(self, ApiError::Store(_) | ApiError::Misconfigured(_)) {
            tracing::error!(error = %self, "request failed");
        }
        json_error(self.status(), code, self.to_string())
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
