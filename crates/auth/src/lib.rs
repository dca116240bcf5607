//! `tollgate-auth` — authorization boundary for the CI orchestration API.
//!
//! This crate is intentionally decoupled from HTTP. Storage is reached only
//! through the traits in [`store`]; the permission resolver itself does no IO.

pub mod authorize;
pub mod claims;
pub mod driver;
pub mod effective;
pub mod group;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod resolver;
pub mod resource;
pub mod route;
pub mod store;

pub use authorize::{Decision, DenyReason, LoadedModels, PermissionResolver};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use driver::{AuthError, Credentials, UserAuthDriver};
pub use effective::{EffectiveGroupLoader, GroupSnapshotCache};
pub use group::{
    ApplicationGroup, EnvironmentGroup, Group, PipelineGroup, ProjectGroup, WorkerModel,
};
pub use jwt::{Hs256JwtValidator, JwtAuthDriver, JwtValidator};
pub use permissions::PermissionLevel;
pub use principal::{HatcheryPrincipal, Principal, PrincipalKind, UserPrincipal, WorkerPrincipal};
pub use resolver::{AgentScheme, HATCHERY_AGENT, PrincipalResolver, WORKER_AGENT};
pub use resource::{ResourceKind, RouteParams};
pub use route::{RouteConfig, required_level};
pub use store::{PermissionStore, PrincipalStore};
