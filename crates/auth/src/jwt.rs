//! Bearer-token user driver.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use tracing::debug;

use crate::{
    AuthError, Credentials, JwtClaims, PrincipalStore, TokenValidationError, UserAuthDriver,
    UserPrincipal, validate_claims,
};

/// Decodes and validates a session token.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HS256 validator over a shared secret.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time window lives in our own claims (`issued_at`/`expires_at`).
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "jwt decode failed");
            TokenValidationError::Malformed
        })?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

/// User driver that authenticates `Authorization: Bearer <jwt>` headers.
pub struct JwtAuthDriver {
    validator: Arc<dyn JwtValidator>,
    store: Arc<dyn PrincipalStore>,
}

impl JwtAuthDriver {
    pub fn new(validator: Arc<dyn JwtValidator>, store: Arc<dyn PrincipalStore>) -> Self {
        Self { validator, store }
    }
}

#[async_trait]
impl UserAuthDriver for JwtAuthDriver {
    async fn check_auth(&self, credentials: &Credentials) -> Result<UserPrincipal, AuthError> {
        let token = credentials.bearer_token().ok_or(AuthError::MissingCredentials)?;
        let claims = self.validator.validate(token, Utc::now())?;
        let user = self.store.load_user_by_username(&claims.sub).await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    fn mint(secret: &str, sub: &str, ttl_secs: i64) -> String {
        let now = Utc::now();
        let claims = JwtClaims {
            sub: sub.to_string(),
            issued_at: now - Duration::seconds(1),
            expires_at: now + Duration::seconds(ttl_secs),
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("encode")
    }

    #[test]
    fn accepts_tokens_signed_with_the_secret() {
        let v = Hs256JwtValidator::new("s3cret");
        let claims = v.validate(&mint("s3cret", "alice", 600), Utc::now()).unwrap();
        assert_eq!(claims.sub, "alice");
    }

    #[test]
    fn rejects_wrong_secret_garbage_and_expiry() {
        let v = Hs256JwtValidator::new("s3cret");
        assert_eq!(
            v.validate(&mint("other", "alice", 600), Utc::now()),
            Err(TokenValidationError::Malformed)
        );
        assert_eq!(v.validate("not-a-jwt", Utc::now()), Err(TokenValidationError::Malformed));
        assert_eq!(
            v.validate(&mint("s3cret", "alice", 600), Utc::now() + Duration::hours(1)),
            Err(TokenValidationError::Expired)
        );
    }
}
