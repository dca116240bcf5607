use serde::{Deserialize, Serialize};

use tollgate_auth::{Principal, PrincipalKind};
use tollgate_core::{WorkerId, WorkerStatus};
use tollgate_fleet::{DisableOutcome, Transition};

#[derive(Debug, Deserialize)]
pub struct ListWorkersQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub applied: bool,
    pub status: WorkerStatus,
}

impl From<Transition> for TransitionResponse {
    fn from(t: Transition) -> Self {
        Self {
            applied: matches!(t, Transition::Applied { .. }),
            status: t.status(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DisableResponse {
    pub worker_id: WorkerId,
    /// `disabled`, `scheduled` or `already_scheduled`.
    pub outcome: &'static str,
}

impl DisableResponse {
    pub fn new(worker_id: WorkerId, outcome: &DisableOutcome) -> Self {
        let outcome = match outcome {
            DisableOutcome::Disabled => "disabled",
            DisableOutcome::Scheduled(_) => "scheduled",
            DisableOutcome::AlreadyScheduled => "already_scheduled",
        };
        Self { worker_id, outcome }
    }
}

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub kind: PrincipalKind,
    pub name: String,
    pub admin: bool,
    pub groups: Vec<String>,
}

impl From<&Principal> for WhoAmI {
    fn from(p: &Principal) -> Self {
        Self {
            kind: p.kind(),
            name: p.name().to_string(),
            admin: p.is_admin(),
            groups: p.effective_groups().iter().map(|g| g.name.clone()).collect(),
        }
    }
}
