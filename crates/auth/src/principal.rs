use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tollgate_core::{GroupId, HatcheryId, ModelId, UserId, WorkerId, WorkerStatus};

use crate::Group;

/// A human (or service) account authenticated by the pluggable user driver.
///
/// `groups` starts empty when loaded from storage and is filled by
/// [`crate::EffectiveGroupLoader`] during request authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPrincipal {
    pub id: UserId,
    pub username: String,
    pub admin: bool,
    pub groups: Vec<Group>,
}

/// A build agent authenticated by its session (the worker id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPrincipal {
    pub id: WorkerId,
    pub name: String,
    pub group_id: GroupId,
    pub hatchery_id: Option<HatcheryId>,
    pub model_id: Option<ModelId>,
    pub status: WorkerStatus,
    pub last_beat: DateTime<Utc>,
    pub groups: Vec<Group>,
}

/// A hatchery service authenticated by its uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HatcheryPrincipal {
    pub id: HatcheryId,
    pub name: String,
    pub group_id: GroupId,
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Worker,
    Hatchery,
}

impl core::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PrincipalKind::User => f.write_str("user"),
            PrincipalKind::Worker => f.write_str("worker"),
            PrincipalKind::Hatchery => f.write_str("hatchery"),
        }
    }
}

/// The authenticated actor behind a request.
///
/// Every variant carries its own effective group set, so the permission
/// resolver never needs to know which kind of actor it is looking at except
/// for the few checks (admin, group admin, hatchery ownership) that differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    User(UserPrincipal),
    Worker(WorkerPrincipal),
    Hatchery(HatcheryPrincipal),
}

impl Principal {
    pub fn kind(&self) -> PrincipalKind {
        match self {
            Principal::User(_) => PrincipalKind::User,
            Principal::Worker(_) => PrincipalKind::Worker,
            Principal::Hatchery(_) => PrincipalKind::Hatchery,
        }
    }

    pub fn effective_groups(&self) -> &[Group] {
        match self {
            Principal::User(u) => &u.groups,
            Principal::Worker(w) => &w.groups,
            Principal::Hatchery(h) => &h.groups,
        }
    }

    pub fn push_group(&mut self, group: Group) {
        match self {
            Principal::User(u) => u.groups.push(group),
            Principal::Worker(w) => w.groups.push(group),
            Principal::Hatchery(h) => h.groups.push(group),
        }
    }

    pub fn is_member_of(&self, group_id: GroupId) -> bool {
        self.effective_groups().iter().any(|g| g.id == group_id)
    }

    /// Global admin flag. Only users can be admins.
    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::User(u) if u.admin)
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Principal::User(u) => Some(u.id),
            _ => None,
        }
    }

    /// Display name used in logs and username-scoped routes.
    pub fn name(&self) -> &str {
        match self {
            Principal::User(u) => &u.username,
            Principal::Worker(w) => &w.name,
            Principal::Hatchery(h) => &h.name,
        }
    }

    pub fn as_user(&self) -> Option<&UserPrincipal> {
        match self {
            Principal::User(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_worker(&self) -> Option<&WorkerPrincipal> {
        match self {
            Principal::Worker(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_hatchery(&self) -> Option<&HatcheryPrincipal> {
        match self {
            Principal::Hatchery(h) => Some(h),
            _ => None,
        }
    }
}
