//! Worker lifecycle status.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Execution state of a build agent.
///
/// `Registering` only exists before the worker record is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Registering,
    Waiting,
    Checking,
    Building,
    Disabled,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Registering => "registering",
            WorkerStatus::Waiting => "waiting",
            WorkerStatus::Checking => "checking",
            WorkerStatus::Building => "building",
            WorkerStatus::Disabled => "disabled",
        }
    }
}

impl core::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for WorkerStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registering" => Ok(WorkerStatus::Registering),
            "waiting" => Ok(WorkerStatus::Waiting),
            "checking" => Ok(WorkerStatus::Checking),
            "building" => Ok(WorkerStatus::Building),
            "disabled" => Ok(WorkerStatus::Disabled),
            other => Err(DomainError::validation(format!("unknown worker status '{other}'"))),
        }
    }
}
