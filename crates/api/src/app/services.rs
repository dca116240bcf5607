//! Service wiring: storage backends, auth components, and the worker lifecycle.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use tollgate_auth::{
    EffectiveGroupLoader, Hs256JwtValidator, JwtAuthDriver, PermissionResolver, PermissionStore,
    PrincipalResolver, PrincipalStore,
};
use tollgate_fleet::{DisableMonitor, JobLookup, RegistrationStore, WorkerLifecycle, WorkerRegistry};
use tollgate_infra::{GateConfig, InMemoryStore, PostgresStore, TtlPermissionCache};

use crate::middleware::AuthState;

/// Storage traits behind one backend.
#[derive(Clone)]
pub struct Storage {
    pub principals: Arc<dyn PrincipalStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub registry: Arc<dyn WorkerRegistry>,
    pub registration: Arc<dyn RegistrationStore>,
    pub jobs: Arc<dyn JobLookup>,
}

impl Storage {
    pub fn in_memory(store: InMemoryStore) -> Self {
        let registry = store.registry();
        let store = Arc::new(store);
        Self {
            principals: store.clone(),
            permissions: store,
            registry: registry.clone(),
            registration: registry.clone(),
            jobs: registry,
        }
    }

    pub fn postgres(store: PostgresStore) -> Self {
        let store = Arc::new(store);
        Self {
            principals: store.clone(),
            permissions: store.clone(),
            registry: store.clone(),
            registration: store.clone(),
            jobs: store,
        }
    }

    /// Postgres when a database URL is configured, otherwise the seeded in-memory store.
    pub async fn from_config(config: &GateConfig) -> anyhow::Result<Self> {
        match &config.database_url {
            Some(url) => {
                let store = PostgresStore::connect(url)
                    .await
                    .context("failed to connect to postgres")?;
                info!("using postgres storage");
                Ok(Self::postgres(store))
            }
            None => {
                info!("DATABASE_URL not set; using seeded in-memory storage");
                Ok(Self::in_memory(InMemoryStore::seeded(&config.shared_infra_group)))
            }
        }
    }
}

#[derive(Clone)]
pub struct AppServices {
    pub auth: AuthState,
    pub lifecycle: WorkerLifecycle,
}

/// Wire the auth stack and worker lifecycle over `storage`.
///
/// Fails when the shared-infrastructure group cannot be loaded.
pub async fn build_services(storage: Storage, config: &GateConfig) -> anyhow::Result<AppServices> {
    let shared_infra = storage
        .permissions
        .load_group_by_name(&config.shared_infra_group)
        .await
        .with_context(|| {
            format!("shared infrastructure group '{}' must exist", config.shared_infra_group)
        })?;

    let cache = Arc::new(TtlPermissionCache::new(config.permission_cache_ttl));
    let groups = EffectiveGroupLoader::new(storage.permissions.clone(), shared_infra.clone())
        .with_cache(cache);

    let jwt = Arc::new(Hs256JwtValidator::new(config.jwt_secret.as_bytes()));
    let driver = Arc::new(JwtAuthDriver::new(jwt, storage.principals.clone()));
    let principals = PrincipalResolver::new(storage.principals.clone(), driver);

    let monitor = DisableMonitor::new(storage.registry.clone(), config.monitor.clone());
    let lifecycle = WorkerLifecycle::new(storage.registry.clone(), storage.registration.clone(), monitor);

    let auth = AuthState {
        principals: Arc::new(principals),
        groups: Arc::new(groups),
        permissions: Arc::new(PermissionResolver::new(shared_infra)),
        models: storage.permissions.clone(),
        jobs: storage.jobs.clone(),
        lifecycle: lifecycle.clone(),
    };

    Ok(AppServices { auth, lifecycle })
}
