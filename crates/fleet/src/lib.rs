//! `tollgate-fleet` — worker registry and lifecycle state machine.
//!
//! Storage is reached only through the traits in [`store`]. The in-memory
//! registry in [`memory`] is for tests/dev.

pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod monitor;
pub mod store;
pub mod worker;

pub use error::{FleetError, FleetResult};
pub use lifecycle::{DisableOutcome, Transition, WorkerLifecycle};
pub use memory::InMemoryRegistry;
pub use monitor::{DisableMonitor, MonitorConfig, MonitorExit, MonitorHandle};
pub use store::{JobLookup, RegistrationStore, RegistryTx, WorkerRegistry};
pub use worker::{Hatchery, JobAssignment, RegistrationForm, Worker, WorkerToken};
