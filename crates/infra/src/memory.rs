//! In-memory principal/permission store for tests/dev.
//!
//! Worker records, hatcheries, tokens and jobs live in the wrapped
//! [`InMemoryRegistry`]; this store adds users, groups and worker models on top.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use tollgate_auth::{
    Group, HatcheryPrincipal, PermissionLevel, PermissionStore, PrincipalStore, UserPrincipal,
    WorkerModel, WorkerPrincipal,
};
use tollgate_core::{GroupId, HatcheryId, ModelId, StoreError, StoreResult, UserId, WorkerId};
use tollgate_fleet::{Hatchery, InMemoryRegistry, WorkerRegistry, WorkerToken};

#[derive(Debug, Default)]
struct Directory {
    users: HashMap<String, UserPrincipal>,
    groups: HashMap<GroupId, Group>,
    memberships: HashMap<UserId, Vec<GroupId>>,
    models: HashMap<ModelId, WorkerModel>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    directory: Arc<RwLock<Directory>>,
    registry: Arc<InMemoryRegistry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> Arc<InMemoryRegistry> {
        self.registry.clone()
    }

    pub fn add_group(&self, group: Group) {
        self.write().groups.insert(group.id, group);
    }

    /// Add a user and its group memberships.
    pub fn add_user(&self, user: UserPrincipal, groups: &[GroupId]) {
        let mut dir = self.write();
        dir.memberships.insert(user.id, groups.to_vec());
        dir.users.insert(user.username.clone(), user);
    }

    pub fn add_model(&self, model: WorkerModel) {
        self.registry.add_model(model.id);
        self.write().models.insert(model.id, model);
    }

    pub fn add_hatchery(&self, hatchery: Hatchery) {
        self.registry.add_hatchery(hatchery);
    }

    pub fn add_token(&self, token: WorkerToken) {
        self.registry.add_token(token);
    }

    /// Development seed: the shared-infrastructure group, an `admin` user and
    /// a `dev-token` registration token for that group.
    pub fn seeded(shared_infra_group: &str) -> Self {
        let store = Self::new();
        let shared = GroupId::new(1);
        store.add_group(Group::new(shared, shared_infra_group));
        store.add_group(
            Group::new(GroupId::new(2), "default").with_project("default", PermissionLevel::ReadWriteExecute),
        );
        store.add_user(
            UserPrincipal {
                id: UserId::new(1),
                username: "admin".to_string(),
                admin: true,
                groups: Vec::new(),
            },
            &[GroupId::new(2)],
        );
        store.add_hatchery(Hatchery {
            id: HatcheryId::new(1),
            uid: "dev-hatchery".to_string(),
            name: "local".to_string(),
            group_id: shared,
        });
        store.add_token(WorkerToken {
            token: "dev-token".to_string(),
            group_id: shared,
            expires_at: None,
        });
        store
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Directory> {
        self.directory.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Directory> {
        self.directory.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PrincipalStore for InMemoryStore {
    async fn load_user_by_username(&self, username: &str) -> StoreResult<UserPrincipal> {
        self.read()
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user", username))
    }

    async fn load_hatchery_by_uid(&self, uid: &str) -> StoreResult<HatcheryPrincipal> {
        let h = self.registry.hatchery_by_uid(uid)?;
        Ok(HatcheryPrincipal {
            id: h.id,
            name: h.name,
            group_id: h.group_id,
            groups: Vec::new(),
        })
    }

    async fn load_worker_principal(&self, id: WorkerId) -> StoreResult<WorkerPrincipal> {
        let w = self.registry.load_worker(id).await?;
        Ok(WorkerPrincipal {
            id: w.id,
            name: w.name,
            group_id: w.group_id,
            hatchery_id: w.hatchery_id,
            model_id: w.model_id,
            status: w.status,
            last_beat: w.last_beat,
            groups: Vec::new(),
        })
    }
}

#[async_trait]
impl PermissionStore for InMemoryStore {
    async fn load_user_groups(&self, user_id: UserId) -> StoreResult<Vec<Group>> {
        let dir = self.read();
        let ids = dir.memberships.get(&user_id).map(Vec::as_slice).unwrap_or_default();
        Ok(ids.iter().filter_map(|id| dir.groups.get(id).cloned()).collect())
    }

    async fn load_group(&self, id: GroupId) -> StoreResult<Group> {
        self.read()
            .groups
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("group", id))
    }

    async fn load_group_by_name(&self, name: &str) -> StoreResult<Group> {
        self.read()
            .groups
            .values()
            .find(|g| g.name == name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("group", name))
    }

    async fn load_worker_model(&self, id: ModelId) -> StoreResult<WorkerModel> {
        self.read()
            .models
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("worker_model", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::WorkerStatus;
    use tollgate_fleet::Worker;

    #[tokio::test]
    async fn seeded_store_has_shared_infra_and_admin() {
        let s = InMemoryStore::seeded("shared.infra");
        let shared = s.load_group_by_name("shared.infra").await.unwrap();
        assert_eq!(shared.id, GroupId::new(1));

        let admin = s.load_user_by_username("admin").await.unwrap();
        assert!(admin.admin);
        assert_eq!(s.load_user_groups(admin.id).await.unwrap().len(), 1);

        let h = s.load_hatchery_by_uid("dev-hatchery").await.unwrap();
        assert_eq!(h.group_id, shared.id);
    }

    #[tokio::test]
    async fn worker_principal_comes_from_the_registry() {
        let s = InMemoryStore::new();
        let w = Worker::registering("w1", GroupId::new(3))
            .with_model(ModelId::new(4))
            .with_status(WorkerStatus::Checking);
        s.registry().put_worker(w.clone());

        let p = s.load_worker_principal(w.id).await.unwrap();
        assert_eq!(p.name, "w1");
        assert_eq!(p.model_id, Some(ModelId::new(4)));
        assert_eq!(p.status, WorkerStatus::Checking);
        assert!(p.groups.is_empty());

        assert!(s.load_worker_principal(WorkerId::new()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn unknown_lookups_are_not_found() {
        let s = InMemoryStore::new();
        assert!(s.load_user_by_username("ghost").await.unwrap_err().is_not_found());
        assert!(s.load_group(GroupId::new(9)).await.unwrap_err().is_not_found());
        assert!(s.load_worker_model(ModelId::new(9)).await.unwrap_err().is_not_found());
        assert!(s.load_user_groups(UserId::new(9)).await.unwrap().is_empty());
    }
}
