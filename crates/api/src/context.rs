use tollgate_auth::Principal;

/// Principal context for a request (authenticated identity + effective groups).
///
/// Inserted by the authorization middleware on routes that require auth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPrincipal {
    principal: Principal,
}

impl RequestPrincipal {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn into_inner(self) -> Principal {
        self.principal
    }
}
