//! Per-route authorization requirements.

use serde::{Deserialize, Serialize};

use crate::PermissionLevel;

/// Requirements a route declares to the authorization middleware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub auth: bool,
    pub need_admin: bool,
    pub need_worker: bool,
    pub need_hatchery: bool,
    pub is_execution: bool,
    pub need_username_or_admin: bool,
}

impl RouteConfig {
    /// No credentials required (e.g. worker registration, health).
    pub fn public() -> Self {
        Self::default()
    }

    pub fn authenticated() -> Self {
        Self {
            auth: true,
            ..Self::default()
        }
    }

    pub fn admin(mut self) -> Self {
        self.need_admin = true;
        self
    }

    pub fn worker(mut self) -> Self {
        self.need_worker = true;
        self
    }

    pub fn hatchery(mut self) -> Self {
        self.need_hatchery = true;
        self
    }

    pub fn execution(mut self) -> Self {
        self.is_execution = true;
        self
    }

    pub fn username_or_admin(mut self) -> Self {
        self.need_username_or_admin = true;
        self
    }
}

/// Permission level a request needs, derived from its HTTP method.
///
/// Execution routes (run a pipeline, take a job) only need execute rights
/// even though they are POSTs.
pub fn required_level(method: &str, is_execution: bool) -> PermissionLevel {
    match method {
        "POST" if is_execution => PermissionLevel::ReadExecute,
        "POST" | "PUT" | "DELETE" => PermissionLevel::ReadWriteExecute,
        _ => PermissionLevel::Read,
    }
}
