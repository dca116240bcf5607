//! `tollgate-core` — identifiers and error types shared by every crate.
//!
//! This crate contains no IO and no policy.

pub mod error;
pub mod id;
pub mod status;
pub mod store;

pub use error::DomainError;
pub use id::{ApplicationId, GroupId, HatcheryId, JobId, ModelId, UserId, WorkerId};
pub use status::WorkerStatus;
pub use store::{StoreError, StoreResult};
