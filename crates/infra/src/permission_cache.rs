//! Per-user group snapshot cache with a TTL.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

use tollgate_auth::{Group, GroupSnapshotCache};
use tollgate_core::UserId;

#[derive(Debug)]
struct Entry {
    loaded_at: Instant,
    groups: Vec<Group>,
}

/// Snapshots expire after `ttl` even if no invalidation arrives.
#[derive(Debug)]
pub struct TtlPermissionCache {
    ttl: Duration,
    entries: RwLock<HashMap<UserId, Entry>>,
}

impl TtlPermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GroupSnapshotCache for TtlPermissionCache {
    fn get(&self, user_id: UserId) -> Option<Vec<Group>> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(&user_id) {
                Some(e) if e.loaded_at.elapsed() < self.ttl => return Some(e.groups.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // expired
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);
        None
    }

    /// Also drops every expired snapshot, so users who never come back do not
    /// accumulate.
    fn put(&self, user_id: UserId, groups: Vec<Group>) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| e.loaded_at.elapsed() < self.ttl);
        if entries.len() < before {
            debug!(pruned = before - entries.len(), "expired permission snapshots pruned");
        }
        entries.insert(
            user_id,
            Entry {
                loaded_at: Instant::now(),
                groups,
            },
        );
    }

    fn invalidate(&self, user_id: UserId) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);
    }

    fn invalidate_all(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        debug!(entries = entries.len(), "permission cache invalidated");
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::GroupId;

    fn groups() -> Vec<Group> {
        vec![Group::new(GroupId::new(10), "teamA")]
    }

    #[test]
    fn hit_until_invalidated() {
        let c = TtlPermissionCache::new(Duration::from_secs(60));
        let u = UserId::new(1);
        assert_eq!(c.get(u), None);

        c.put(u, groups());
        assert_eq!(c.get(u), Some(groups()));

        c.invalidate(u);
        assert_eq!(c.get(u), None);
    }

    #[test]
    fn invalidate_all_clears_every_user() {
        let c = TtlPermissionCache::new(Duration::from_secs(60));
        c.put(UserId::new(1), groups());
        c.put(UserId::new(2), groups());
        assert_eq!(c.len(), 2);

        c.invalidate_all();
        assert!(c.is_empty());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let c = TtlPermissionCache::new(Duration::from_millis(10));
        let u = UserId::new(1);
        c.put(u, groups());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(c.get(u), None);
        assert!(c.is_empty());
    }

    #[test]
    fn put_prunes_snapshots_of_users_that_never_return() {
        let c = TtlPermissionCache::new(Duration::from_millis(10));
        c.put(UserId::new(1), groups());
        c.put(UserId::new(2), groups());
        std::thread::sleep(Duration::from_millis(20));

        c.put(UserId::new(3), groups());
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(UserId::new(3)), Some(groups()));
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let c = TtlPermissionCache::new(Duration::ZERO);
        c.put(UserId::new(1), groups());
        assert!(c.is_empty());
    }
}
