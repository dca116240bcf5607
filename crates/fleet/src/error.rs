use thiserror::Error;

use tollgate_core::{StoreError, WorkerId};

pub type FleetResult<T> = Result<T, FleetError>;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("worker {0} not found")]
    NotFound(WorkerId),

    #[error("wrong request: {0}")]
    WrongRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FleetError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn wrong_request(msg: impl Into<String>) -> Self {
        Self::WrongRequest(msg.into())
    }
}
