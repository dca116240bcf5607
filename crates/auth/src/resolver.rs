//! Credential → principal resolution.
//!
//! Two machine-agent schemes are fixed and selected by user agent; every
//! other caller goes through the pluggable [`UserAuthDriver`].

use std::sync::Arc;

use tracing::instrument;

use tollgate_core::WorkerId;

use crate::{AuthError, Credentials, Principal, PrincipalStore, UserAuthDriver};

pub const HATCHERY_AGENT: &str = "tollgate/hatchery";
pub const WORKER_AGENT: &str = "tollgate/worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentScheme {
    Hatchery,
    Worker,
    User,
}

impl AgentScheme {
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        match user_agent {
            Some(HATCHERY_AGENT) => AgentScheme::Hatchery,
            Some(WORKER_AGENT) => AgentScheme::Worker,
            _ => AgentScheme::User,
        }
    }
}

#[derive(Clone)]
pub struct PrincipalResolver {
    store: Arc<dyn PrincipalStore>,
    driver: Arc<dyn UserAuthDriver>,
}

impl PrincipalResolver {
    pub fn new(store: Arc<dyn PrincipalStore>, driver: Arc<dyn UserAuthDriver>) -> Self {
        Self { store, driver }
    }

    /// Resolve the bare principal (no effective groups yet).
    #[instrument(skip_all, fields(agent = credentials.user_agent.as_deref()))]
    pub async fn resolve(&self, credentials: &Credentials) -> Result<Principal, AuthError> {
        match AgentScheme::from_user_agent(credentials.user_agent.as_deref()) {
            AgentScheme::Hatchery => {
                let uid = credentials
                    .hatchery_uid
                    .as_deref()
                    .filter(|uid| !uid.is_empty())
                    .ok_or(AuthError::MissingCredentials)?;
                let hatchery = self.store.load_hatchery_by_uid(uid).await?;
                Ok(Principal::Hatchery(hatchery))
            }
            AgentScheme::Worker => {
                let session = credentials
                    .worker_session
                    .as_deref()
                    .ok_or(AuthError::MissingCredentials)?;
                let id: WorkerId = session
                    .parse()
                    .map_err(|_| AuthError::InvalidCredentials("malformed worker session".into()))?;
                let worker = self.store.load_worker_principal(id).await?;
                Ok(Principal::Worker(worker))
            }
            AgentScheme::User => {
                let user = self.driver.check_auth(credentials).await?;
                Ok(Principal::User(user))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use tollgate_core::{GroupId, HatcheryId, StoreError, StoreResult, UserId, WorkerStatus};

    use crate::principal::{HatcheryPrincipal, UserPrincipal, WorkerPrincipal};
    use crate::PrincipalKind;

    struct FakeStore {
        worker: WorkerId,
    }

    #[async_trait]
    impl PrincipalStore for FakeStore {
        async fn load_user_by_username(&self, username: &str) -> StoreResult<UserPrincipal> {
            Err(StoreError::not_found("user", username))
        }

        async fn load_hatchery_by_uid(&self, uid: &str) -> StoreResult<HatcheryPrincipal> {
            if uid != "h-uid" {
                return Err(StoreError::not_found("hatchery", uid));
            }
            Ok(HatcheryPrincipal {
                id: HatcheryId::new(7),
                name: "h1".into(),
                group_id: GroupId::new(10),
                groups: Vec::new(),
            })
        }

        async fn load_worker_principal(&self, id: WorkerId) -> StoreResult<WorkerPrincipal> {
            if id != self.worker {
                return Err(StoreError::not_found("worker", id));
            }
            Ok(WorkerPrincipal {
                id,
                name: "w1".into(),
                group_id: GroupId::new(10),
                hatchery_id: None,
                model_id: None,
                status: WorkerStatus::Waiting,
                last_beat: Utc::now(),
                groups: Vec::new(),
            })
        }
    }

    struct StaticDriver;

    #[async_trait]
    impl UserAuthDriver for StaticDriver {
        async fn check_auth(&self, credentials: &Credentials) -> Result<UserPrincipal, AuthError> {
            match credentials.bearer_token() {
                Some("good") => Ok(UserPrincipal {
                    id: UserId::new(2),
                    username: "alice".into(),
                    admin: false,
                    groups: Vec::new(),
                }),
                Some(_) => Err(AuthError::InvalidCredentials("bad token".into())),
                None => Err(AuthError::MissingCredentials),
            }
        }
    }

    fn resolver(worker: WorkerId) -> PrincipalResolver {
        PrincipalResolver::new(Arc::new(FakeStore { worker }), Arc::new(StaticDriver))
    }

    #[test]
    fn scheme_is_selected_by_exact_agent() {
        assert_eq!(AgentScheme::from_user_agent(Some(HATCHERY_AGENT)), AgentScheme::Hatchery);
        assert_eq!(AgentScheme::from_user_agent(Some(WORKER_AGENT)), AgentScheme::Worker);
        assert_eq!(AgentScheme::from_user_agent(Some("curl/8.0")), AgentScheme::User);
        assert_eq!(AgentScheme::from_user_agent(None), AgentScheme::User);
    }

    #[tokio::test]
    async fn each_scheme_resolves_its_principal_kind() {
        let w = WorkerId::new();
        let r = resolver(w);

        let hatchery = Credentials {
            user_agent: Some(HATCHERY_AGENT.into()),
            hatchery_uid: Some("h-uid".into()),
            ..Credentials::default()
        };
        assert_eq!(r.resolve(&hatchery).await.unwrap().kind(), PrincipalKind::Hatchery);

        let worker = Credentials {
            user_agent: Some(WORKER_AGENT.into()),
            worker_session: Some(w.to_string()),
            ..Credentials::default()
        };
        assert_eq!(r.resolve(&worker).await.unwrap().kind(), PrincipalKind::Worker);

        let user = Credentials {
            authorization: Some("Bearer good".into()),
            ..Credentials::default()
        };
        assert_eq!(r.resolve(&user).await.unwrap().kind(), PrincipalKind::User);
    }

    #[tokio::test]
    async fn bad_credentials_are_unauthorized() {
        let r = resolver(WorkerId::new());

        let cases = [
            Credentials {
                user_agent: Some(HATCHERY_AGENT.into()),
                hatchery_uid: Some("unknown".into()),
                ..Credentials::default()
            },
            Credentials {
                user_agent: Some(WORKER_AGENT.into()),
                worker_session: Some("not-a-uuid".into()),
                ..Credentials::default()
            },
            Credentials {
                user_agent: Some(WORKER_AGENT.into()),
                worker_session: Some(WorkerId::new().to_string()),
                ..Credentials::default()
            },
            // hatchery agent cannot fall back to a bearer token
            Credentials {
                user_agent: Some(HATCHERY_AGENT.into()),
                authorization: Some("Bearer good".into()),
                ..Credentials::default()
            },
            Credentials::default(),
        ];
        for c in cases {
            let err = r.resolve(&c).await.unwrap_err();
            assert!(err.is_unauthorized(), "{c:?} -> {err}");
        }
    }
}
