//! Route parameters and the resource kinds they select.
//!
//! A route declares which resources it touches purely through the *names* of
//! its path parameters. Each recognized name maps to exactly one
//! [`ResourceKind`]; unrecognized names are ignored by the resolver.

use std::collections::BTreeMap;

use serde::Serialize;

/// Path parameter names understood by the authorization layer.
pub mod params {
    pub const PROJECT_KEY: &str = "project_key";
    /// Parent project of a pipeline/application/environment route.
    pub const KEY: &str = "key";
    pub const PIPELINE_NAME: &str = "pipeline_name";
    pub const APPLICATION_NAME: &str = "application_name";
    pub const APPLICATION_ID: &str = "application_id";
    pub const ENVIRONMENT_NAME: &str = "environment_name";
    pub const GROUP_NAME: &str = "group_name";
    pub const ACTION_NAME: &str = "action_name";
    pub const MODEL_ID: &str = "model_id";
    pub const JOB_ID: &str = "job_id";
    pub const USERNAME: &str = "username";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Project,
    Pipeline,
    Application,
    ApplicationById,
    Environment,
    Group,
    Action,
    WorkerModel,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Project,
        ResourceKind::Pipeline,
        ResourceKind::Application,
        ResourceKind::ApplicationById,
        ResourceKind::Environment,
        ResourceKind::Group,
        ResourceKind::Action,
        ResourceKind::WorkerModel,
    ];

    pub fn param_name(self) -> &'static str {
        match self {
            ResourceKind::Project => params::PROJECT_KEY,
            ResourceKind::Pipeline => params::PIPELINE_NAME,
            ResourceKind::Application => params::APPLICATION_NAME,
            ResourceKind::ApplicationById => params::APPLICATION_ID,
            ResourceKind::Environment => params::ENVIRONMENT_NAME,
            ResourceKind::Group => params::GROUP_NAME,
            ResourceKind::Action => params::ACTION_NAME,
            ResourceKind::WorkerModel => params::MODEL_ID,
        }
    }

    pub fn from_param(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.param_name() == name)
    }

    /// Pipelines, applications and environments are only unique within a project.
    pub fn needs_parent_project(self) -> bool {
        matches!(
            self,
            ResourceKind::Pipeline | ResourceKind::Application | ResourceKind::Environment
        )
    }
}

impl core::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.param_name())
    }
}

/// Matched path parameters of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams(BTreeMap<String, String>);

impl RouteParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Parent project key for project-scoped resources (`key`, else `project_key`).
    pub fn parent_project_key(&self) -> Option<&str> {
        self.get(params::KEY).or_else(|| self.get(params::PROJECT_KEY))
    }

    /// Every parameter that selects a resource checker, in stable order.
    pub fn resources(&self) -> impl Iterator<Item = (ResourceKind, &str)> {
        self.0
            .iter()
            .filter_map(|(name, value)| ResourceKind::from_param(name).map(|k| (k, value.as_str())))
    }
}

impl<K, V> FromIterator<(K, V)> for RouteParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_round_trips_through_its_param_name() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_param(kind.param_name()), Some(kind));
        }
        assert_eq!(ResourceKind::from_param("permProjectKey"), None);
        assert_eq!(ResourceKind::from_param(params::KEY), None);
    }

    #[test]
    fn resources_skip_unknown_params() {
        let p = RouteParams::new()
            .with(params::KEY, "proj1")
            .with(params::PIPELINE_NAME, "build")
            .with("tag", "v1");

        let kinds: Vec<_> = p.resources().collect();
        assert_eq!(kinds, vec![(ResourceKind::Pipeline, "build")]);
    }

    #[test]
    fn parent_project_prefers_key() {
        let p = RouteParams::new().with(params::PROJECT_KEY, "a").with(params::KEY, "b");
        assert_eq!(p.parent_project_key(), Some("b"));

        let p = RouteParams::new().with(params::PROJECT_KEY, "a");
        assert_eq!(p.parent_project_key(), Some("a"));

        assert_eq!(RouteParams::new().parent_project_key(), None);
    }
}
