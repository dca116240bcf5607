//! Detached Checking → Disabled monitor.
//!
//! A worker caught in `Checking` may be mid-handshake, so `disable` hands it
//! to a background task that waits for it to settle in `Waiting` and then
//! disables it with a compare-and-set.
//!
//! The task only holds the worker id and the registry handle; every poll and
//! the final commit go through fresh storage calls.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tollgate_core::{WorkerId, WorkerStatus};

use crate::WorkerRegistry;

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Delay before each poll.
    pub poll_interval: Duration,
    /// Polls that reached storage before giving up.
    pub max_attempts: u32,
    /// Optional wall-clock bound, also covering storage outages.
    pub deadline: Option<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: 100,
            deadline: None,
        }
    }
}

impl MonitorConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Why a monitor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorExit {
    /// Observed `Waiting` and committed `Disabled`.
    Disabled,
    /// Worker started building; left untouched.
    WorkerBuilding,
    /// Someone else already disabled it.
    AlreadyDisabled,
    /// Record disappeared (unregistered).
    WorkerGone,
    /// A non-transient storage error.
    StoreFailed(String),
    BudgetExhausted { attempts: u32 },
    DeadlineExceeded,
    Shutdown,
    /// The task panicked or was aborted.
    Aborted,
}

/// Join handle of one monitor task.
#[derive(Debug)]
pub struct MonitorHandle {
    worker_id: WorkerId,
    join: JoinHandle<MonitorExit>,
}

impl MonitorHandle {
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the monitor to stop.
    pub async fn wait(self) -> MonitorExit {
        self.join.await.unwrap_or(MonitorExit::Aborted)
    }
}

/// Spawns and tracks disable monitors, at most one per worker.
#[derive(Clone)]
pub struct DisableMonitor {
    registry: Arc<dyn WorkerRegistry>,
    config: MonitorConfig,
    active: Arc<Mutex<HashSet<WorkerId>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DisableMonitor {
    pub fn new(registry: Arc<dyn WorkerRegistry>, config: MonitorConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            registry,
            config,
            active: Arc::new(Mutex::new(HashSet::new())),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_monitoring(&self, worker_id: WorkerId) -> bool {
        lock(&self.active).contains(&worker_id)
    }

    /// Start monitoring `worker_id`. Returns `None` if a monitor for it is
    /// already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, worker_id: WorkerId) -> Option<MonitorHandle> {
        if !lock(&self.active).insert(worker_id) {
            debug!(%worker_id, "disable monitor already running");
            return None;
        }

        let slot = ActiveSlot {
            active: self.active.clone(),
            worker_id,
        };
        let registry = self.registry.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown_rx.clone();

        let join = tokio::spawn(async move {
            let _slot = slot;
            let exit = run(registry, worker_id, config, shutdown).await;
            match &exit {
                MonitorExit::Disabled => info!(%worker_id, "worker disabled after leaving checking"),
                MonitorExit::BudgetExhausted { attempts } => {
                    error!(%worker_id, attempts, "unable to disable worker: attempt budget exhausted")
                }
                MonitorExit::DeadlineExceeded => {
                    error!(%worker_id, "unable to disable worker: deadline exceeded")
                }
                MonitorExit::StoreFailed(e) => warn!(%worker_id, error = %e, "disable monitor stopped"),
                other => debug!(%worker_id, exit = ?other, "disable monitor stopped"),
            }
            exit
        });

        Some(MonitorHandle { worker_id, join })
    }

    /// Stop every running monitor (process shutdown).
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Releases the per-worker slot when the task ends, including on panic.
struct ActiveSlot {
    active: Arc<Mutex<HashSet<WorkerId>>>,
    worker_id: WorkerId,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.worker_id);
    }
}

fn lock(active: &Mutex<HashSet<WorkerId>>) -> std::sync::MutexGuard<'_, HashSet<WorkerId>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run(
    registry: Arc<dyn WorkerRegistry>,
    worker_id: WorkerId,
    config: MonitorConfig,
    mut shutdown: watch::Receiver<bool>,
) -> MonitorExit {
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return MonitorExit::Shutdown;
        }

        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return MonitorExit::Shutdown;
                }
                continue;
            }
        }

        if config.deadline.is_some_and(|d| started.elapsed() >= d) {
            return MonitorExit::DeadlineExceeded;
        }

        let worker = match registry.load_worker(worker_id).await {
            Ok(worker) => worker,
            Err(e) if e.is_unavailable() => {
                // outages do not consume the budget
                warn!(%worker_id, error = %e, "storage unavailable while monitoring worker");
                continue;
            }
            Err(e) if e.is_not_found() => return MonitorExit::WorkerGone,
            Err(e) => return MonitorExit::StoreFailed(e.to_string()),
        };
        attempts += 1;

        match worker.status {
            WorkerStatus::Building => return MonitorExit::WorkerBuilding,
            WorkerStatus::Disabled => return MonitorExit::AlreadyDisabled,
            WorkerStatus::Waiting => {
                match registry
                    .compare_and_set_status(worker_id, WorkerStatus::Waiting, WorkerStatus::Disabled)
                    .await
                {
                    Ok(true) => return MonitorExit::Disabled,
                    Ok(false) => debug!(%worker_id, "worker left waiting before disable commit"),
                    Err(e) if e.is_unavailable() => {
                        warn!(%worker_id, error = %e, "storage unavailable while disabling worker");
                        attempts -= 1;
                        continue;
                    }
                    Err(e) if e.is_not_found() => return MonitorExit::WorkerGone,
                    Err(e) => return MonitorExit::StoreFailed(e.to_string()),
                }
            }
            WorkerStatus::Checking | WorkerStatus::Registering => {}
        }

        if attempts >= config.max_attempts {
            return MonitorExit::BudgetExhausted { attempts };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryRegistry, Worker};
    use tollgate_core::{GroupId, HatcheryId};

    fn fast() -> MonitorConfig {
        MonitorConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_max_attempts(10)
    }

    fn checking_worker(registry: &InMemoryRegistry) -> WorkerId {
        let w = Worker::registering("w1", GroupId::new(1))
            .with_hatchery(HatcheryId::new(7))
            .with_status(WorkerStatus::Checking);
        let id = w.id;
        registry.put_worker(w);
        id
    }

    #[tokio::test]
    async fn disables_once_worker_reaches_waiting() {
        let registry = InMemoryRegistry::arc();
        let id = checking_worker(&registry);
        let monitor = DisableMonitor::new(registry.clone(), fast().with_max_attempts(1000));

        let handle = monitor.schedule(id).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.load_worker(id).await.unwrap().status, WorkerStatus::Checking);

        registry.set_status(id, WorkerStatus::Waiting).await.unwrap();
        assert_eq!(handle.wait().await, MonitorExit::Disabled);
        assert_eq!(registry.load_worker(id).await.unwrap().status, WorkerStatus::Disabled);
        assert!(!monitor.is_monitoring(id));
    }

    #[tokio::test]
    async fn stuck_worker_exhausts_budget_without_state_change() {
        let registry = InMemoryRegistry::arc();
        let id = checking_worker(&registry);
        let monitor = DisableMonitor::new(registry.clone(), fast());

        let exit = monitor.schedule(id).unwrap().wait().await;
        assert_eq!(exit, MonitorExit::BudgetExhausted { attempts: 10 });
        assert_eq!(registry.load_worker(id).await.unwrap().status, WorkerStatus::Checking);
    }

    #[tokio::test(start_paused = true)]
    async fn default_budget_abandons_a_worker_stuck_in_checking() {
        let registry = InMemoryRegistry::arc();
        let id = checking_worker(&registry);
        let monitor = DisableMonitor::new(registry.clone(), MonitorConfig::default());

        let started = Instant::now();
        let exit = monitor.schedule(id).unwrap().wait().await;
        assert_eq!(exit, MonitorExit::BudgetExhausted { attempts: 100 });
        assert!(started.elapsed() >= Duration::from_millis(500) * 100);
        assert_eq!(registry.load_worker(id).await.unwrap().status, WorkerStatus::Checking);
        assert!(!monitor.is_monitoring(id));
    }

    #[tokio::test]
    async fn building_worker_is_left_alone() {
        let registry = InMemoryRegistry::arc();
        let id = checking_worker(&registry);
        registry.set_status(id, WorkerStatus::Building).await.unwrap();
        let monitor = DisableMonitor::new(registry.clone(), fast());

        assert_eq!(monitor.schedule(id).unwrap().wait().await, MonitorExit::WorkerBuilding);
        assert_eq!(registry.load_worker(id).await.unwrap().status, WorkerStatus::Building);
    }

    #[tokio::test]
    async fn outage_polls_do_not_consume_budget() {
        let registry = InMemoryRegistry::arc();
        let id = checking_worker(&registry);
        let monitor = DisableMonitor::new(registry.clone(), fast().with_max_attempts(3));

        let waiting = registry.load_worker(id).await.unwrap().with_status(WorkerStatus::Waiting);
        registry.set_unavailable(true);
        let handle = monitor.schedule(id).unwrap();
        // far more than 3 poll intervals
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!handle.is_finished());

        registry.put_worker(waiting);
        registry.set_unavailable(false);
        assert_eq!(handle.wait().await, MonitorExit::Disabled);
    }

    #[tokio::test]
    async fn deadline_bounds_outages() {
        let registry = InMemoryRegistry::arc();
        let id = checking_worker(&registry);
        let monitor = DisableMonitor::new(
            registry.clone(),
            fast().with_deadline(Duration::from_millis(40)),
        );

        registry.set_unavailable(true);
        assert_eq!(monitor.schedule(id).unwrap().wait().await, MonitorExit::DeadlineExceeded);
    }

    #[tokio::test]
    async fn one_monitor_per_worker_and_shutdown_stops_it() {
        let registry = InMemoryRegistry::arc();
        let id = checking_worker(&registry);
        let monitor = DisableMonitor::new(registry.clone(), fast().with_max_attempts(10_000));

        let handle = monitor.schedule(id).unwrap();
        assert!(monitor.schedule(id).is_none());
        assert!(monitor.is_monitoring(id));

        monitor.shutdown();
        assert_eq!(handle.wait().await, MonitorExit::Shutdown);
        assert!(!monitor.is_monitoring(id));
    }

    #[tokio::test]
    async fn unregistered_worker_stops_monitor() {
        let registry = InMemoryRegistry::arc();
        let id = checking_worker(&registry);
        let monitor = DisableMonitor::new(registry.clone(), fast().with_max_attempts(10_000));

        let handle = monitor.schedule(id).unwrap();
        registry.delete_worker(id).await.unwrap();
        assert_eq!(handle.wait().await, MonitorExit::WorkerGone);
    }
}
