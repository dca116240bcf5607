//! Permission resolution over a principal's effective groups.
//!
//! - No IO (worker models referenced by the route are preloaded by the caller)
//! - No panics
//! - Every deny carries a [`DenyReason`] for logs; callers collapse it to a
//!   single HTTP status.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use tollgate_core::{ApplicationId, GroupId, ModelId};

use crate::{Group, PermissionLevel, Principal, ResourceKind, RouteParams, WorkerModel};

/// Worker models referenced by the current route, keyed by id.
pub type LoadedModels = HashMap<ModelId, WorkerModel>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Decision::Allow => None,
            Decision::Deny(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("no {required} access on {kind} '{key}'")]
    NotEntitled {
        kind: ResourceKind,
        key: String,
        required: PermissionLevel,
    },

    #[error("route misconfigured: {kind} check needs a parent project key")]
    MissingParentProject { kind: ResourceKind },

    #[error("malformed {kind} parameter '{value}'")]
    MalformedParameter { kind: ResourceKind, value: String },

    #[error("worker model {0} not found")]
    UnknownModel(ModelId),
}

impl DenyReason {
    /// A route bug rather than a caller without rights (served as 500).
    pub fn is_route_misconfiguration(&self) -> bool {
        matches!(self, DenyReason::MissingParentProject { .. })
    }
}

/// Inputs shared by every per-kind checker for one decision.
struct Check<'a> {
    principal: &'a Principal,
    parent_project: Option<&'a str>,
    required: PermissionLevel,
    models: &'a LoadedModels,
    shared_infra: GroupId,
}

impl Check<'_> {
    fn groups(&self) -> &[Group] {
        self.principal.effective_groups()
    }

    fn verdict(&self, allowed: bool, kind: ResourceKind, key: &str) -> Decision {
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny(DenyReason::NotEntitled {
                kind,
                key: key.to_string(),
                required: self.required,
            })
        }
    }
}

type Checker = fn(&Check<'_>, &str) -> Decision;

/// Resource kind → checker implementation.
fn checker(kind: ResourceKind) -> Checker {
    match kind {
        ResourceKind::Project => check_project,
        ResourceKind::Pipeline => check_pipeline,
        ResourceKind::Application => check_application,
        ResourceKind::ApplicationById => check_application_id,
        ResourceKind::Environment => check_environment,
        ResourceKind::Group => check_group,
        ResourceKind::Action => check_action,
        ResourceKind::WorkerModel => check_worker_model,
    }
}

/// Decides allow/deny for a principal against the resources a route names.
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    shared_infra: Group,
}

impl PermissionResolver {
    /// The shared-infrastructure group must already exist in storage.
    pub fn new(shared_infra: Group) -> Self {
        Self { shared_infra }
    }

    pub fn shared_infra(&self) -> &Group {
        &self.shared_infra
    }

    /// Membership in the shared-infrastructure group bypasses every check.
    pub fn has_universal_access(&self, principal: &Principal) -> bool {
        principal.is_member_of(self.shared_infra.id)
    }

    /// Authorize every resource parameter of a route (logical AND).
    ///
    /// Parameters whose names do not select a checker are ignored, so a
    /// route without resource parameters is allowed.
    pub fn authorize(
        &self,
        principal: &Principal,
        params: &RouteParams,
        required: PermissionLevel,
        models: &LoadedModels,
    ) -> Decision {
        if self.has_universal_access(principal) {
            return Decision::Allow;
        }

        let check = self.context(principal, params.parent_project_key(), required, models);
        for (kind, value) in params.resources() {
            debug!(principal = principal.name(), %kind, value, "checking permission");
            let decision = checker(kind)(&check, value);
            if let Decision::Deny(reason) = &decision {
                warn!(
                    principal = principal.name(),
                    principal_kind = %principal.kind(),
                    %reason,
                    "access denied"
                );
                return decision;
            }
        }
        Decision::Allow
    }

    /// Authorize a single resource reference.
    pub fn authorize_resource(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        key: &str,
        parent_project: Option<&str>,
        required: PermissionLevel,
        models: &LoadedModels,
    ) -> Decision {
        if self.has_universal_access(principal) {
            return Decision::Allow;
        }
        let check = self.context(principal, parent_project, required, models);
        checker(kind)(&check, key)
    }

    fn context<'a>(
        &self,
        principal: &'a Principal,
        parent_project: Option<&'a str>,
        required: PermissionLevel,
        models: &'a LoadedModels,
    ) -> Check<'a> {
        Check {
            principal,
            parent_project,
            required,
            models,
            shared_infra: self.shared_infra.id,
        }
    }
}

fn check_project(c: &Check<'_>, project_key: &str) -> Decision {
    let allowed = c
        .groups()
        .iter()
        .flat_map(|g| &g.project_groups)
        .any(|p| p.project_key == project_key && p.permission.allows(c.required));
    c.verdict(allowed, ResourceKind::Project, project_key)
}

fn check_pipeline(c: &Check<'_>, pipeline_name: &str) -> Decision {
    let Some(project_key) = c.parent_project else {
        return Decision::Deny(DenyReason::MissingParentProject {
            kind: ResourceKind::Pipeline,
        });
    };
    let allowed = c.groups().iter().flat_map(|g| &g.pipeline_groups).any(|p| {
        p.pipeline_name == pipeline_name
            && p.project_key == project_key
            && p.permission.allows(c.required)
    });
    c.verdict(allowed, ResourceKind::Pipeline, pipeline_name)
}

fn check_application(c: &Check<'_>, application_name: &str) -> Decision {
    let Some(project_key) = c.parent_project else {
        return Decision::Deny(DenyReason::MissingParentProject {
            kind: ResourceKind::Application,
        });
    };
    let allowed = c.groups().iter().flat_map(|g| &g.application_groups).any(|a| {
        a.application_name == application_name
            && a.project_key == project_key
            && a.permission.allows(c.required)
    });
    c.verdict(allowed, ResourceKind::Application, application_name)
}

fn check_application_id(c: &Check<'_>, raw: &str) -> Decision {
    let Ok(application_id) = raw.parse::<ApplicationId>() else {
        return Decision::Deny(DenyReason::MalformedParameter {
            kind: ResourceKind::ApplicationById,
            value: raw.to_string(),
        });
    };
    let allowed = c
        .groups()
        .iter()
        .flat_map(|g| &g.application_groups)
        .any(|a| a.application_id == application_id && a.permission.allows(c.required));
    c.verdict(allowed, ResourceKind::ApplicationById, raw)
}

fn check_environment(c: &Check<'_>, environment_name: &str) -> Decision {
    let Some(project_key) = c.parent_project else {
        return Decision::Deny(DenyReason::MissingParentProject {
            kind: ResourceKind::Environment,
        });
    };
    let allowed = c.groups().iter().flat_map(|g| &g.environment_groups).any(|e| {
        e.environment_name == environment_name
            && e.project_key == project_key
            && e.permission.allows(c.required)
    });
    c.verdict(allowed, ResourceKind::Environment, environment_name)
}

fn check_group(c: &Check<'_>, group_name: &str) -> Decision {
    let user_id = c.principal.user_id();
    let allowed = c.groups().iter().filter(|g| g.name == group_name).any(|g| {
        c.required == PermissionLevel::Read || user_id.is_some_and(|id| g.is_admin(id))
    });
    c.verdict(allowed, ResourceKind::Group, group_name)
}

// Actions are global, not group-scoped.
fn check_action(c: &Check<'_>, action_name: &str) -> Decision {
    let allowed = c.required == PermissionLevel::Read || c.principal.is_admin();
    c.verdict(allowed, ResourceKind::Action, action_name)
}

fn check_worker_model(c: &Check<'_>, raw: &str) -> Decision {
    let Ok(model_id) = raw.parse::<ModelId>() else {
        return Decision::Deny(DenyReason::MalformedParameter {
            kind: ResourceKind::WorkerModel,
            value: raw.to_string(),
        });
    };
    let Some(model) = c.models.get(&model_id) else {
        return Decision::Deny(DenyReason::UnknownModel(model_id));
    };

    let allowed = match c.principal {
        Principal::Hatchery(h) => h.group_id == c.shared_infra || h.group_id == model.group_id,
        Principal::User(u) => {
            u.admin
                || u.groups.iter().filter(|g| g.id == model.group_id).any(|g| {
                    c.required == PermissionLevel::Read || g.is_admin(u.id)
                })
        }
        Principal::Worker(_) => {
            c.required == PermissionLevel::Read && c.principal.is_member_of(model.group_id)
        }
    };
    c.verdict(allowed, ResourceKind::WorkerModel, raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::{HatcheryPrincipal, UserPrincipal, WorkerPrincipal};
    use crate::resource::params;
    use chrono::Utc;
    use tollgate_core::{HatcheryId, UserId, WorkerId, WorkerStatus};

    const SHARED: GroupId = GroupId::new(1);

    fn resolver() -> PermissionResolver {
        PermissionResolver::new(Group::new(SHARED, "shared.infra"))
    }

    fn user(id: i64, admin: bool, groups: Vec<Group>) -> Principal {
        Principal::User(UserPrincipal {
            id: UserId::new(id),
            username: format!("user{id}"),
            admin,
            groups,
        })
    }

    fn hatchery(group_id: GroupId, groups: Vec<Group>) -> Principal {
        Principal::Hatchery(HatcheryPrincipal {
            id: HatcheryId::new(7),
            name: "hatchery".to_string(),
            group_id,
            groups,
        })
    }

    fn worker(groups: Vec<Group>) -> Principal {
        Principal::Worker(WorkerPrincipal {
            id: WorkerId::new(),
            name: "worker".to_string(),
            group_id: GroupId::new(20),
            hatchery_id: None,
            model_id: None,
            status: WorkerStatus::Waiting,
            last_beat: Utc::now(),
            groups,
        })
    }

    fn team_a() -> Group {
        Group::new(GroupId::new(10), "teamA").with_project("proj1", PermissionLevel::ReadExecute)
    }

    fn no_models() -> LoadedModels {
        LoadedModels::new()
    }

    fn models(model: WorkerModel) -> LoadedModels {
        let mut m = LoadedModels::new();
        m.insert(model.id, model);
        m
    }

    #[test]
    fn project_level_at_or_below_stored_is_allowed() {
        let r = resolver();
        let p = user(2, false, vec![team_a()]);
        let params = RouteParams::new().with(params::PROJECT_KEY, "proj1");

        assert!(r.authorize(&p, &params, PermissionLevel::Read, &no_models()).is_allowed());
        assert!(r.authorize(&p, &params, PermissionLevel::ReadExecute, &no_models()).is_allowed());

        let denied = r.authorize(&p, &params, PermissionLevel::ReadWriteExecute, &no_models());
        assert!(matches!(
            denied,
            Decision::Deny(DenyReason::NotEntitled { kind: ResourceKind::Project, .. })
        ));
    }

    #[test]
    fn unknown_project_is_denied() {
        let r = resolver();
        let p = user(2, false, vec![team_a()]);
        let params = RouteParams::new().with(params::PROJECT_KEY, "proj2");
        assert!(!r.authorize(&p, &params, PermissionLevel::Read, &no_models()).is_allowed());
    }

    #[test]
    fn shared_infra_membership_allows_everything() {
        let r = resolver();
        let p = user(2, false, vec![Group::new(SHARED, "shared.infra")]);
        let params = RouteParams::new()
            .with(params::PROJECT_KEY, "anything")
            .with(params::PIPELINE_NAME, "p")
            .with(params::GROUP_NAME, "g")
            .with(params::ACTION_NAME, "a")
            .with(params::MODEL_ID, "not-even-a-number");

        for level in PermissionLevel::ALL {
            assert!(r.authorize(&p, &params, level, &no_models()).is_allowed());
            for kind in ResourceKind::ALL {
                assert!(r.authorize_resource(&p, kind, "x", None, level, &no_models()).is_allowed());
            }
        }
    }

    #[test]
    fn route_without_resource_params_is_allowed() {
        let r = resolver();
        let p = user(2, false, vec![]);
        let params = RouteParams::new().with("id", "12");
        assert!(r.authorize(&p, &params, PermissionLevel::ReadWriteExecute, &no_models()).is_allowed());
    }

    #[test]
    fn pipeline_needs_matching_parent_project() {
        let r = resolver();
        let g = Group::new(GroupId::new(10), "teamA").with_pipeline(
            "proj1",
            "build",
            PermissionLevel::ReadWriteExecute,
        );
        let p = user(2, false, vec![g]);

        let ok = RouteParams::new().with(params::KEY, "proj1").with(params::PIPELINE_NAME, "build");
        assert!(r.authorize(&p, &ok, PermissionLevel::ReadWriteExecute, &no_models()).is_allowed());

        let other_project = RouteParams::new()
            .with(params::KEY, "proj2")
            .with(params::PIPELINE_NAME, "build");
        assert!(!r.authorize(&p, &other_project, PermissionLevel::Read, &no_models()).is_allowed());
    }

    #[test]
    fn application_and_environment_need_matching_parent_project() {
        let r = resolver();
        let g = Group::new(GroupId::new(10), "teamA")
            .with_application("proj1", ApplicationId::new(5), "api", PermissionLevel::Read)
            .with_environment("proj1", "prod", PermissionLevel::Read);
        let p = user(2, false, vec![g]);

        for (kind, name) in [(ResourceKind::Application, "api"), (ResourceKind::Environment, "prod")] {
            assert!(r
                .authorize_resource(&p, kind, name, Some("proj1"), PermissionLevel::Read, &no_models())
                .is_allowed());
            assert!(!r
                .authorize_resource(&p, kind, name, Some("proj9"), PermissionLevel::Read, &no_models())
                .is_allowed());
        }
    }

    #[test]
    fn missing_parent_project_is_a_route_misconfiguration() {
        let r = resolver();
        let p = user(2, false, vec![team_a()]);
        let params = RouteParams::new().with(params::ENVIRONMENT_NAME, "prod");

        let decision = r.authorize(&p, &params, PermissionLevel::Read, &no_models());
        let reason = decision.deny_reason().unwrap();
        assert!(reason.is_route_misconfiguration());
    }

    #[test]
    fn application_by_id() {
        let r = resolver();
        let g = Group::new(GroupId::new(10), "teamA").with_application(
            "proj1",
            ApplicationId::new(5),
            "api",
            PermissionLevel::ReadExecute,
        );
        let p = user(2, false, vec![g]);

        let params = RouteParams::new().with(params::APPLICATION_ID, "5");
        assert!(r.authorize(&p, &params, PermissionLevel::ReadExecute, &no_models()).is_allowed());

        let params = RouteParams::new().with(params::APPLICATION_ID, "6");
        assert!(!r.authorize(&p, &params, PermissionLevel::Read, &no_models()).is_allowed());

        let params = RouteParams::new().with(params::APPLICATION_ID, "five");
        assert!(matches!(
            r.authorize(&p, &params, PermissionLevel::Read, &no_models()),
            Decision::Deny(DenyReason::MalformedParameter { .. })
        ));
    }

    #[test]
    fn all_matched_checkers_must_allow() {
        let r = resolver();
        let g = team_a().with_pipeline("proj1", "build", PermissionLevel::Read);
        let p = user(2, false, vec![g]);
        let params = RouteParams::new()
            .with(params::PROJECT_KEY, "proj1")
            .with(params::PIPELINE_NAME, "build");

        assert!(r.authorize(&p, &params, PermissionLevel::Read, &no_models()).is_allowed());
        // project grants RX but the pipeline only R
        let decision = r.authorize(&p, &params, PermissionLevel::ReadExecute, &no_models());
        assert!(matches!(
            decision,
            Decision::Deny(DenyReason::NotEntitled { kind: ResourceKind::Pipeline, .. })
        ));
    }

    #[test]
    fn group_read_for_members_write_for_group_admins() {
        let r = resolver();
        let member = user(2, false, vec![Group::new(GroupId::new(10), "teamA")]);
        let admin = user(3, false, vec![Group::new(GroupId::new(10), "teamA").with_admin(UserId::new(3))]);
        let outsider = user(4, false, vec![]);
        let params = RouteParams::new().with(params::GROUP_NAME, "teamA");

        assert!(r.authorize(&member, &params, PermissionLevel::Read, &no_models()).is_allowed());
        assert!(!r.authorize(&member, &params, PermissionLevel::ReadWriteExecute, &no_models()).is_allowed());
        assert!(r.authorize(&admin, &params, PermissionLevel::ReadWriteExecute, &no_models()).is_allowed());
        assert!(!r.authorize(&outsider, &params, PermissionLevel::Read, &no_models()).is_allowed());
    }

    #[test]
    fn actions_are_readable_by_all_writable_by_admins() {
        let r = resolver();
        let params = RouteParams::new().with(params::ACTION_NAME, "git-clone");

        assert!(r.authorize(&user(2, false, vec![]), &params, PermissionLevel::Read, &no_models()).is_allowed());
        assert!(!r
            .authorize(&user(2, false, vec![]), &params, PermissionLevel::ReadExecute, &no_models())
            .is_allowed());
        assert!(r
            .authorize(&user(2, true, vec![]), &params, PermissionLevel::ReadWriteExecute, &no_models())
            .is_allowed());
    }

    #[test]
    fn worker_model_for_hatcheries() {
        let r = resolver();
        let model = WorkerModel {
            id: ModelId::new(3),
            name: "docker".to_string(),
            group_id: GroupId::new(10),
        };
        let params = RouteParams::new().with(params::MODEL_ID, "3");

        let owner = hatchery(GroupId::new(10), vec![Group::new(GroupId::new(10), "teamA")]);
        let stranger = hatchery(GroupId::new(11), vec![Group::new(GroupId::new(11), "teamB")]);

        let level = PermissionLevel::ReadWriteExecute;
        assert!(r.authorize(&owner, &params, level, &models(model.clone())).is_allowed());
        assert!(!r.authorize(&stranger, &params, level, &models(model)).is_allowed());
    }

    #[test]
    fn worker_model_for_users() {
        let r = resolver();
        let model = WorkerModel {
            id: ModelId::new(3),
            name: "docker".to_string(),
            group_id: GroupId::new(10),
        };
        let loaded = models(model);
        let params = RouteParams::new().with(params::MODEL_ID, "3");

        let member = user(2, false, vec![Group::new(GroupId::new(10), "teamA")]);
        let group_admin = user(3, false, vec![Group::new(GroupId::new(10), "teamA").with_admin(UserId::new(3))]);
        let global_admin = user(4, true, vec![]);
        let outsider = user(5, false, vec![Group::new(GroupId::new(99), "other")]);

        assert!(r.authorize(&member, &params, PermissionLevel::Read, &loaded).is_allowed());
        assert!(!r.authorize(&member, &params, PermissionLevel::ReadWriteExecute, &loaded).is_allowed());
        assert!(r.authorize(&group_admin, &params, PermissionLevel::ReadWriteExecute, &loaded).is_allowed());
        assert!(r.authorize(&global_admin, &params, PermissionLevel::ReadWriteExecute, &loaded).is_allowed());
        assert!(!r.authorize(&outsider, &params, PermissionLevel::Read, &loaded).is_allowed());
    }

    #[test]
    fn worker_model_for_workers_is_read_only() {
        let r = resolver();
        let model = WorkerModel {
            id: ModelId::new(3),
            name: "docker".to_string(),
            group_id: GroupId::new(10),
        };
        let loaded = models(model);
        let params = RouteParams::new().with(params::MODEL_ID, "3");
        let w = worker(vec![Group::new(GroupId::new(10), "teamA")]);

        assert!(r.authorize(&w, &params, PermissionLevel::Read, &loaded).is_allowed());
        assert!(!r.authorize(&w, &params, PermissionLevel::ReadExecute, &loaded).is_allowed());
    }

    #[test]
    fn worker_model_id_must_parse_and_exist() {
        let r = resolver();
        let p = user(2, false, vec![]);

        let malformed = RouteParams::new().with(params::MODEL_ID, "12a");
        assert!(matches!(
            r.authorize(&p, &malformed, PermissionLevel::Read, &no_models()),
            Decision::Deny(DenyReason::MalformedParameter { kind: ResourceKind::WorkerModel, .. })
        ));

        let missing = RouteParams::new().with(params::MODEL_ID, "12");
        assert_eq!(
            r.authorize(&p, &missing, PermissionLevel::Read, &no_models()),
            Decision::Deny(DenyReason::UnknownModel(ModelId::new(12)))
        );
    }
}
