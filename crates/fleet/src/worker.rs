use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tollgate_core::{GroupId, HatcheryId, JobId, ModelId, WorkerId, WorkerStatus};

/// Persisted worker record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub group_id: GroupId,
    pub hatchery_id: Option<HatcheryId>,
    pub model_id: Option<ModelId>,
    pub status: WorkerStatus,
    pub last_beat: DateTime<Utc>,
    #[serde(default)]
    pub binary_capabilities: Vec<String>,
    /// Whether the worker registered with the server's own version.
    #[serde(default)]
    pub uptodate: bool,
}

impl Worker {
    /// A record in the transient `Registering` state.
    pub fn registering(name: impl Into<String>, group_id: GroupId) -> Self {
        Self {
            id: WorkerId::new(),
            name: name.into(),
            group_id,
            hatchery_id: None,
            model_id: None,
            status: WorkerStatus::Registering,
            last_beat: Utc::now(),
            binary_capabilities: Vec::new(),
            uptodate: false,
        }
    }

    pub fn with_hatchery(mut self, hatchery_id: HatcheryId) -> Self {
        self.hatchery_id = Some(hatchery_id);
        self
    }

    pub fn with_model(mut self, model_id: ModelId) -> Self {
        self.model_id = Some(model_id);
        self
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn spawned_by_hatchery(&self) -> bool {
        self.hatchery_id.is_some()
    }
}

/// Payload a worker posts to register itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationForm {
    pub name: String,
    pub token: String,
    #[serde(default)]
    pub model_id: Option<ModelId>,
    #[serde(default)]
    pub hatchery_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub binary_capabilities: Vec<String>,
}

/// Registration token; registered workers inherit its group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerToken {
    pub token: String,
    pub group_id: GroupId,
    pub expires_at: Option<DateTime<Utc>>,
}

impl WorkerToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A hatchery as known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hatchery {
    pub id: HatcheryId,
    pub uid: String,
    pub name: String,
    pub group_id: GroupId,
}

/// Worker a job was handed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAssignment {
    pub job_id: JobId,
    pub worker_name: String,
    pub worker_id: WorkerId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn token_expiry() {
        let now = Utc::now();
        let mut t = WorkerToken {
            token: "t".into(),
            group_id: GroupId::new(1),
            expires_at: None,
        };
        assert!(!t.is_expired(now));

        t.expires_at = Some(now + Duration::minutes(1));
        assert!(!t.is_expired(now));

        t.expires_at = Some(now - Duration::minutes(1));
        assert!(t.is_expired(now));
    }

    #[test]
    fn registration_form_defaults_optional_fields() {
        let form: RegistrationForm = serde_json::from_str(r#"{"name":"w1","token":"abc"}"#).unwrap();
        assert_eq!(form.model_id, None);
        assert_eq!(form.hatchery_name, None);
        assert!(form.binary_capabilities.is_empty());
    }
}
