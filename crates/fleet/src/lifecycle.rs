//! Worker lifecycle state machine.
//!
//! ```text
//! register ─► Waiting ◄──────────────┐
//!               │ mark_checking      │ mark_waiting
//!               ▼                    │
//!            Checking ─► Building ───┘
//!
//! disable: Waiting/Disabled ─► Disabled (synchronous)
//!          Checking         ─► monitor, Disabled once Waiting
//!          Building         ─► Forbidden
//! ```

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use tollgate_core::{StoreError, WorkerId, WorkerStatus};

use crate::{
    DisableMonitor, FleetError, FleetResult, MonitorHandle, RegistrationForm, RegistrationStore,
    Worker, WorkerRegistry,
};

/// Result of a status-changing request that may legitimately be a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied { from: WorkerStatus, to: WorkerStatus },
    Ignored { current: WorkerStatus },
}

impl Transition {
    pub fn status(&self) -> WorkerStatus {
        match self {
            Transition::Applied { to, .. } => *to,
            Transition::Ignored { current } => *current,
        }
    }
}

#[derive(Debug)]
pub enum DisableOutcome {
    /// Committed synchronously.
    Disabled,
    /// Worker was checking; a monitor will disable it once it is waiting.
    Scheduled(MonitorHandle),
    /// A monitor for this worker is already running.
    AlreadyScheduled,
}

#[derive(Clone)]
pub struct WorkerLifecycle {
    registry: Arc<dyn WorkerRegistry>,
    registration: Arc<dyn RegistrationStore>,
    monitor: DisableMonitor,
    server_version: String,
}

impl WorkerLifecycle {
    pub fn new(
        registry: Arc<dyn WorkerRegistry>,
        registration: Arc<dyn RegistrationStore>,
        monitor: DisableMonitor,
    ) -> Self {
        Self {
            registry,
            registration,
            monitor,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    pub fn monitor(&self) -> &DisableMonitor {
        &self.monitor
    }

    /// Validate a registration form and insert the worker as `Waiting`.
    ///
    /// Unknown/expired token, unknown hatchery or model, and duplicate names
    /// are all `Unauthorized`.
    #[instrument(skip_all, fields(worker = %form.name))]
    pub async fn register(&self, form: RegistrationForm) -> FleetResult<Worker> {
        if form.name.trim().is_empty() {
            return Err(FleetError::unauthorized("worker name is empty"));
        }

        let token = self
            .registration
            .load_token(&form.token)
            .await
            .map_err(|e| rejected(e, "invalid registration token"))?;
        if token.is_expired(Utc::now()) {
            return Err(FleetError::unauthorized("registration token expired"));
        }

        let mut worker = Worker::registering(form.name, token.group_id);

        if let Some(name) = form.hatchery_name.as_deref().filter(|n| !n.is_empty()) {
            let hatchery = self
                .registration
                .load_hatchery_by_name(name)
                .await
                .map_err(|e| rejected(e, &format!("unknown hatchery '{name}'")))?;
            worker = worker.with_hatchery(hatchery.id);
        }

        if let Some(model_id) = form.model_id {
            if !self.registration.worker_model_exists(model_id).await? {
                return Err(FleetError::unauthorized(format!("unknown worker model {model_id}")));
            }
            worker = worker.with_model(model_id);
        }

        worker.binary_capabilities = form.binary_capabilities;
        worker.uptodate = form.version.as_deref() == Some(self.server_version.as_str());
        worker.status = WorkerStatus::Waiting;

        self.registry
            .insert_worker(&worker)
            .await
            .map_err(|e| rejected(e, "worker name already registered"))?;

        info!(worker_id = %worker.id, uptodate = worker.uptodate, "worker registered");
        Ok(worker)
    }

    /// Refresh the last beat. An unknown worker is a no-op.
    pub async fn heartbeat(&self, id: WorkerId) -> FleetResult<()> {
        match self.registry.refresh_worker(id, Utc::now()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(worker_id = %id, "heartbeat for unknown worker ignored");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    pub async fn mark_checking(&self, id: WorkerId) -> FleetResult<Transition> {
        let worker = self.load(id).await?;
        if worker.status != WorkerStatus::Waiting {
            debug!(worker = %worker.name, status = %worker.status, "worker cannot be checking");
            return Ok(Transition::Ignored { current: worker.status });
        }
        self.swap(&worker, WorkerStatus::Checking).await
    }

    #[instrument(skip(self))]
    pub async fn mark_waiting(&self, id: WorkerId) -> FleetResult<Transition> {
        let worker = self.load(id).await?;
        match worker.status {
            WorkerStatus::Checking | WorkerStatus::Building => {
                self.swap(&worker, WorkerStatus::Waiting).await
            }
            WorkerStatus::Waiting => Ok(Transition::Ignored { current: worker.status }),
            other => {
                debug!(worker = %worker.name, status = %other, "worker cannot be waiting");
                Ok(Transition::Ignored { current: other })
            }
        }
    }

    /// Disable a hatchery-spawned worker that is not building.
    #[instrument(skip(self))]
    pub async fn disable(&self, id: WorkerId) -> FleetResult<DisableOutcome> {
        let mut tx = self.registry.begin().await?;

        let worker = match tx.load_worker(id).await {
            Ok(w) => w,
            Err(e) if e.is_not_found() => return Err(FleetError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };

        if worker.status == WorkerStatus::Building {
            return Err(FleetError::forbidden(format!(
                "cannot disable worker {} while building",
                worker.name
            )));
        }
        if !worker.spawned_by_hatchery() {
            return Err(FleetError::forbidden(format!(
                "cannot disable worker {} not started by a hatchery",
                worker.name
            )));
        }

        if worker.status == WorkerStatus::Checking {
            drop(tx);
            warn!(worker = %worker.name, "worker is checking, it will be disabled once waiting");
            return Ok(match self.monitor.schedule(id) {
                Some(handle) => DisableOutcome::Scheduled(handle),
                None => DisableOutcome::AlreadyScheduled,
            });
        }

        match tx.update_status(id, WorkerStatus::Disabled).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                return Err(FleetError::wrong_request(format!("worker {id} does not exist")));
            }
            Err(e) => return Err(e.into()),
        }
        match tx.commit().await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                return Err(FleetError::wrong_request(format!("worker {id} does not exist")));
            }
            Err(StoreError::Conflict(reason)) => {
                warn!(worker = %worker.name, %reason, "worker changed status before disable commit");
                return Err(FleetError::wrong_request(format!(
                    "worker {} changed status, retry the disable",
                    worker.name
                )));
            }
            Err(e) => return Err(e.into()),
        }

        info!(worker = %worker.name, "worker disabled");
        Ok(DisableOutcome::Disabled)
    }

    /// Delete the worker record. Absent workers are tolerated.
    #[instrument(skip(self))]
    pub async fn unregister(&self, id: WorkerId) -> FleetResult<()> {
        if !self.registry.delete_worker(id).await? {
            debug!(worker_id = %id, "unregister of unknown worker ignored");
        }
        Ok(())
    }

    pub async fn list_workers(&self, status: Option<WorkerStatus>) -> FleetResult<Vec<Worker>> {
        Ok(self.registry.list_workers(status).await?)
    }

    pub async fn load_worker(&self, id: WorkerId) -> FleetResult<Worker> {
        self.load(id).await
    }

    async fn load(&self, id: WorkerId) -> FleetResult<Worker> {
        match self.registry.load_worker(id).await {
            Ok(w) => Ok(w),
            Err(e) if e.is_not_found() => Err(FleetError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn swap(&self, worker: &Worker, to: WorkerStatus) -> FleetResult<Transition> {
        let from = worker.status;
        let applied = match self.registry.compare_and_set_status(worker.id, from, to).await {
            Ok(applied) => applied,
            Err(e) if e.is_not_found() => {
                return Err(FleetError::wrong_request(format!("worker {} does not exist", worker.id)));
            }
            Err(e) => return Err(e.into()),
        };
        if applied {
            Ok(Transition::Applied { from, to })
        } else {
            let current = self.load(worker.id).await?.status;
            debug!(worker = %worker.name, %current, "status changed concurrently");
            Ok(Transition::Ignored { current })
        }
    }
}

/// Validation lookups that miss become `Unauthorized`; real storage faults pass through.
fn rejected(err: StoreError, reason: &str) -> FleetError {
    match err {
        StoreError::NotFound { .. } | StoreError::Conflict(_) => {
            warn!(%reason, "worker registration rejected");
            FleetError::unauthorized(reason)
        }
        other => FleetError::Store(other),
    }
}
