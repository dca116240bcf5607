use async_trait::async_trait;
use thiserror::Error;

use tollgate_core::StoreError;

use crate::{TokenValidationError, UserPrincipal};

/// Raw credential material extracted from a request by the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user_agent: Option<String>,
    pub authorization: Option<String>,
    pub hatchery_uid: Option<String>,
    pub worker_session: Option<String>,
}

impl Credentials {
    /// Bearer token from the authorization header, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.authorization
            .as_deref()
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error(transparent)]
    Token(#[from] TokenValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Credential problems as opposed to backend failures. Both reject the
    /// request; only the log severity differs.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            AuthError::MissingCredentials
            | AuthError::InvalidCredentials(_)
            | AuthError::Token(_) => true,
            AuthError::Store(e) => e.is_not_found(),
        }
    }
}

/// Pluggable user authentication (session tokens, LDAP, ...).
#[async_trait]
pub trait UserAuthDriver: Send + Sync {
    async fn check_auth(&self, credentials: &Credentials) -> Result<UserPrincipal, AuthError>;
}
