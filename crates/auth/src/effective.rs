//! Effective-group augmentation of freshly resolved principals.

use std::sync::Arc;

use tracing::{debug, instrument};

use tollgate_core::UserId;

use crate::{AuthError, Group, PermissionStore, Principal};

/// Per-user snapshot of loaded groups.
///
/// Implementations own their invalidation contract: entries must be dropped
/// on [`invalidate`](Self::invalidate)/[`invalidate_all`](Self::invalidate_all)
/// and should expire on their own as a safety net.
pub trait GroupSnapshotCache: Send + Sync {
    fn get(&self, user_id: UserId) -> Option<Vec<Group>>;

    fn put(&self, user_id: UserId, groups: Vec<Group>);

    fn invalidate(&self, user_id: UserId);

    fn invalidate_all(&self);
}

/// Loads the groups the permission resolver evaluates for each principal kind.
#[derive(Clone)]
pub struct EffectiveGroupLoader {
    store: Arc<dyn PermissionStore>,
    cache: Option<Arc<dyn GroupSnapshotCache>>,
    shared_infra: Group,
}

impl EffectiveGroupLoader {
    pub fn new(store: Arc<dyn PermissionStore>, shared_infra: Group) -> Self {
        Self {
            store,
            cache: None,
            shared_infra,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn GroupSnapshotCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<dyn GroupSnapshotCache>> {
        self.cache.as_ref()
    }

    /// Attach effective groups to `principal`. Any load failure is an auth error.
    #[instrument(skip_all, fields(principal = principal.name(), kind = %principal.kind()))]
    pub async fn augment(&self, principal: &mut Principal) -> Result<(), AuthError> {
        match principal {
            Principal::User(user) => {
                user.groups = self.user_groups(user.id).await?;
            }
            Principal::Hatchery(hatchery) => {
                let group = self.store.load_group(hatchery.group_id).await?;
                hatchery.groups.push(group);
            }
            Principal::Worker(worker) => {
                let group = self.store.load_group(worker.group_id).await?;
                worker.groups.push(group);

                if let Some(model_id) = worker.model_id {
                    let model = self.store.load_worker_model(model_id).await?;
                    if model.group_id == self.shared_infra.id {
                        worker.groups.push(self.shared_infra.clone());
                    } else {
                        let group = self.store.load_group(model.group_id).await?;
                        worker.groups.push(group);
                    }
                }
            }
        }
        Ok(())
    }

    async fn user_groups(&self, user_id: UserId) -> Result<Vec<Group>, AuthError> {
        if let Some(groups) = self.cache.as_ref().and_then(|c| c.get(user_id)) {
            debug!(%user_id, "group snapshot cache hit");
            return Ok(groups);
        }

        let groups = self.store.load_user_groups(user_id).await?;
        if let Some(cache) = &self.cache {
            cache.put(user_id, groups.clone());
        }
        Ok(groups)
    }
}
