//! Storage seams of the worker registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tollgate_core::{JobId, ModelId, StoreResult, WorkerId, WorkerStatus};

use crate::{Hatchery, JobAssignment, Worker, WorkerToken};

/// Worker records: point lookups, status scans and atomic status updates.
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Open a transactional scope. Dropping it without `commit` rolls back.
    async fn begin(&self) -> StoreResult<Box<dyn RegistryTx>>;

    async fn load_worker(&self, id: WorkerId) -> StoreResult<Worker>;

    async fn load_worker_by_name(&self, name: &str) -> StoreResult<Worker>;

    /// Fails with `StoreError::Conflict` when the name is already taken.
    async fn insert_worker(&self, worker: &Worker) -> StoreResult<()>;

    async fn refresh_worker(&self, id: WorkerId, at: DateTime<Utc>) -> StoreResult<()>;

    async fn set_status(&self, id: WorkerId, status: WorkerStatus) -> StoreResult<()>;

    /// Set `new` only if the current status is `expected`. Returns whether it was applied.
    async fn compare_and_set_status(
        &self,
        id: WorkerId,
        expected: WorkerStatus,
        new: WorkerStatus,
    ) -> StoreResult<bool>;

    /// Returns whether a record was deleted.
    async fn delete_worker(&self, id: WorkerId) -> StoreResult<bool>;

    async fn list_workers(&self, status: Option<WorkerStatus>) -> StoreResult<Vec<Worker>>;
}

/// A transactional scope over the registry.
#[async_trait]
pub trait RegistryTx: Send {
    async fn load_worker(&mut self, id: WorkerId) -> StoreResult<Worker>;

    async fn update_status(&mut self, id: WorkerId, status: WorkerStatus) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Lookups needed to validate a registration.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn load_token(&self, token: &str) -> StoreResult<WorkerToken>;

    async fn load_hatchery_by_name(&self, name: &str) -> StoreResult<Hatchery>;

    async fn worker_model_exists(&self, id: ModelId) -> StoreResult<bool>;
}

/// Job → assigned worker, for the task-ownership check.
#[async_trait]
pub trait JobLookup: Send + Sync {
    async fn load_job(&self, id: JobId) -> StoreResult<JobAssignment>;
}
