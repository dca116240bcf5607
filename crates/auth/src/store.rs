//! Storage seams used during authentication and group loading.
//!
//! Implementations live in `tollgate-infra` (in-memory for tests/dev, Postgres
//! for production).

use async_trait::async_trait;

use tollgate_core::{GroupId, ModelId, StoreResult, UserId, WorkerId};

use crate::{Group, HatcheryPrincipal, UserPrincipal, WorkerModel, WorkerPrincipal};

/// Loads the bare principals (without effective groups) behind credentials.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn load_user_by_username(&self, username: &str) -> StoreResult<UserPrincipal>;

    async fn load_hatchery_by_uid(&self, uid: &str) -> StoreResult<HatcheryPrincipal>;

    async fn load_worker_principal(&self, id: WorkerId) -> StoreResult<WorkerPrincipal>;
}

/// Loads groups with their resource associations.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Every group the user is a member of, fully loaded.
    async fn load_user_groups(&self, user_id: UserId) -> StoreResult<Vec<Group>>;

    async fn load_group(&self, id: GroupId) -> StoreResult<Group>;

    async fn load_group_by_name(&self, name: &str) -> StoreResult<Group>;

    async fn load_worker_model(&self, id: ModelId) -> StoreResult<WorkerModel>;
}
