//! Groups and their per-resource-kind permission associations.

use serde::{Deserialize, Serialize};

use tollgate_core::{ApplicationId, GroupId, ModelId, UserId};

use crate::PermissionLevel;

/// Project association: access to every operation scoped by the project key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectGroup {
    pub project_key: String,
    pub permission: PermissionLevel,
}

/// Pipeline names are only unique within a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineGroup {
    pub pipeline_name: String,
    pub project_key: String,
    pub permission: PermissionLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationGroup {
    pub application_id: ApplicationId,
    pub application_name: String,
    pub project_key: String,
    pub permission: PermissionLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentGroup {
    pub environment_name: String,
    pub project_key: String,
    pub permission: PermissionLevel,
}

/// A permission group with its admins and resource associations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub admins: Vec<UserId>,
    pub project_groups: Vec<ProjectGroup>,
    pub pipeline_groups: Vec<PipelineGroup>,
    pub application_groups: Vec<ApplicationGroup>,
    pub environment_groups: Vec<EnvironmentGroup>,
}

impl Group {
    pub fn new(id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            admins: Vec::new(),
            project_groups: Vec::new(),
            pipeline_groups: Vec::new(),
            application_groups: Vec::new(),
            environment_groups: Vec::new(),
        }
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.contains(&user_id)
    }

    pub fn with_admin(mut self, user_id: UserId) -> Self {
        self.admins.push(user_id);
        self
    }

    pub fn with_project(mut self, project_key: impl Into<String>, permission: PermissionLevel) -> Self {
        self.project_groups.push(ProjectGroup {
            project_key: project_key.into(),
            permission,
        });
        self
    }

    pub fn with_pipeline(
        mut self,
        project_key: impl Into<String>,
        pipeline_name: impl Into<String>,
        permission: PermissionLevel,
    ) -> Self {
        self.pipeline_groups.push(PipelineGroup {
            pipeline_name: pipeline_name.into(),
            project_key: project_key.into(),
            permission,
        });
        self
    }

    pub fn with_application(
        mut self,
        project_key: impl Into<String>,
        application_id: ApplicationId,
        application_name: impl Into<String>,
        permission: PermissionLevel,
    ) -> Self {
        self.application_groups.push(ApplicationGroup {
            application_id,
            application_name: application_name.into(),
            project_key: project_key.into(),
            permission,
        });
        self
    }

    pub fn with_environment(
        mut self,
        project_key: impl Into<String>,
        environment_name: impl Into<String>,
        permission: PermissionLevel,
    ) -> Self {
        self.environment_groups.push(EnvironmentGroup {
            environment_name: environment_name.into(),
            project_key: project_key.into(),
            permission,
        });
        self
    }
}

/// Worker model: only its owning group matters for authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerModel {
    pub id: ModelId,
    pub name: String,
    pub group_id: GroupId,
}
