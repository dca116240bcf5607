//! In-memory registry for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tollgate_core::{JobId, ModelId, StoreError, StoreResult, WorkerId, WorkerStatus};

use crate::{
    Hatchery, JobAssignment, JobLookup, RegistrationStore, RegistryTx, Worker, WorkerRegistry,
    WorkerToken,
};

#[derive(Debug, Default)]
struct RegistryState {
    workers: HashMap<WorkerId, Worker>,
    tokens: HashMap<String, WorkerToken>,
    hatcheries: HashMap<String, Hatchery>,
    models: HashSet<ModelId>,
    jobs: HashMap<JobId, JobAssignment>,
}

/// Registry backed by a `RwLock<HashMap>`.
///
/// [`set_unavailable`](Self::set_unavailable) makes every operation fail with
/// `StoreError::Unavailable`, to exercise outage handling.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    state: Arc<RwLock<RegistryState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn add_token(&self, token: WorkerToken) {
        self.write().tokens.insert(token.token.clone(), token);
    }

    pub fn add_hatchery(&self, hatchery: Hatchery) {
        self.write().hatcheries.insert(hatchery.name.clone(), hatchery);
    }

    pub fn add_model(&self, id: ModelId) {
        self.write().models.insert(id);
    }

    pub fn add_job(&self, job: JobAssignment) {
        self.write().jobs.insert(job.job_id, job);
    }

    /// Insert or replace a worker record as-is.
    pub fn put_worker(&self, worker: Worker) {
        self.write().workers.insert(worker.id, worker);
    }

    pub fn hatchery_by_uid(&self, uid: &str) -> StoreResult<Hatchery> {
        self.check()?;
        self.read()
            .hatcheries
            .values()
            .find(|h| h.uid == uid)
            .cloned()
            .ok_or_else(|| StoreError::not_found("hatchery", uid))
    }

    fn check(&self) -> StoreResult<()> {
        check(&self.unavailable)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check(unavailable: &AtomicBool) -> StoreResult<()> {
    if unavailable.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable("in-memory registry marked unavailable".into()));
    }
    Ok(())
}

#[async_trait]
impl WorkerRegistry for InMemoryRegistry {
    async fn begin(&self) -> StoreResult<Box<dyn RegistryTx>> {
        self.check()?;
        Ok(Box::new(InMemoryTx {
            registry: self.clone(),
            observed: HashMap::new(),
            pending: Vec::new(),
        }))
    }

    async fn load_worker(&self, id: WorkerId) -> StoreResult<Worker> {
        self.check()?;
        self.read()
            .workers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("worker", id))
    }

    async fn load_worker_by_name(&self, name: &str) -> StoreResult<Worker> {
        self.check()?;
        self.read()
            .workers
            .values()
            .find(|w| w.name == name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("worker", name))
    }

    async fn insert_worker(&self, worker: &Worker) -> StoreResult<()> {
        self.check()?;
        let mut state = self.write();
        if state.workers.values().any(|w| w.name == worker.name) {
            return Err(StoreError::Conflict(format!("worker name '{}' already registered", worker.name)));
        }
        state.workers.insert(worker.id, worker.clone());
        Ok(())
    }

    async fn refresh_worker(&self, id: WorkerId, at: DateTime<Utc>) -> StoreResult<()> {
        self.check()?;
        let mut state = self.write();
        let worker = state
            .workers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("worker", id))?;
        worker.last_beat = at;
        Ok(())
    }

    async fn set_status(&self, id: WorkerId, status: WorkerStatus) -> StoreResult<()> {
        self.check()?;
        let mut state = self.write();
        let worker = state
            .workers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("worker", id))?;
        worker.status = status;
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: WorkerId,
        expected: WorkerStatus,
        new: WorkerStatus,
    ) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.write();
        let worker = state
            .workers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("worker", id))?;
        if worker.status != expected {
            return Ok(false);
        }
        worker.status = new;
        Ok(true)
    }

    async fn delete_worker(&self, id: WorkerId) -> StoreResult<bool> {
        self.check()?;
        Ok(self.write().workers.remove(&id).is_some())
    }

    async fn list_workers(&self, status: Option<WorkerStatus>) -> StoreResult<Vec<Worker>> {
        self.check()?;
        let mut workers: Vec<_> = self
            .read()
            .workers
            .values()
            .filter(|w| status.is_none_or(|s| w.status == s))
            .cloned()
            .collect();
        workers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workers)
    }
}

/// Buffers status updates until commit.
///
/// Commit only applies if every worker read through the transaction still
/// has the status it was read with, standing in for the row lock a database
/// transaction would hold.
struct InMemoryTx {
    registry: InMemoryRegistry,
    observed: HashMap<WorkerId, WorkerStatus>,
    pending: Vec<(WorkerId, WorkerStatus)>,
}

#[async_trait]
impl RegistryTx for InMemoryTx {
    async fn load_worker(&mut self, id: WorkerId) -> StoreResult<Worker> {
        let mut worker = self.registry.load_worker(id).await?;
        self.observed.entry(id).or_insert(worker.status);
        if let Some((_, status)) = self.pending.iter().rev().find(|(pending, _)| *pending == id) {
            worker.status = *status;
        }
        Ok(worker)
    }

    async fn update_status(&mut self, id: WorkerId, status: WorkerStatus) -> StoreResult<()> {
        self.registry.check()?;
        if !self.registry.read().workers.contains_key(&id) {
            return Err(StoreError::not_found("worker", id));
        }
        self.pending.push((id, status));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTx {
            registry,
            observed,
            pending,
        } = *self;
        registry.check()?;
        let mut state = registry.write();
        for (id, _) in &pending {
            let Some(worker) = state.workers.get(id) else {
                return Err(StoreError::not_found("worker", id));
            };
            if let Some(seen) = observed.get(id).filter(|seen| **seen != worker.status) {
                return Err(StoreError::Conflict(format!(
                    "worker {id} moved from {seen} to {} during the transaction",
                    worker.status
                )));
            }
        }
        for (id, status) in pending {
            if let Some(worker) = state.workers.get_mut(&id) {
                worker.status = status;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistry {
    async fn load_token(&self, token: &str) -> StoreResult<WorkerToken> {
        self.check()?;
        self.read()
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| StoreError::not_found("worker_token", "<redacted>"))
    }

    async fn load_hatchery_by_name(&self, name: &str) -> StoreResult<Hatchery> {
        self.check()?;
        self.read()
            .hatcheries
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("hatchery", name))
    }

    async fn worker_model_exists(&self, id: ModelId) -> StoreResult<bool> {
        self.check()?;
        Ok(self.read().models.contains(&id))
    }
}

#[async_trait]
impl JobLookup for InMemoryRegistry {
    async fn load_job(&self, id: JobId) -> StoreResult<JobAssignment> {
        self.check()?;
        self.read()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("job", id))
    }
}
