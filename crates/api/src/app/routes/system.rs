use axum::{extract::Extension, http::StatusCode, Json};

use crate::app::dto::WhoAmI;
use crate::context::RequestPrincipal;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(principal): Extension<RequestPrincipal>) -> Json<WhoAmI> {
    Json(WhoAmI::from(principal.principal()))
}
