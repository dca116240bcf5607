//! Process configuration from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use tollgate_fleet::MonitorConfig;

pub const BIND_ADDR: &str = "TOLLGATE_BIND_ADDR";
pub const DATABASE_URL: &str = "DATABASE_URL";
pub const JWT_SECRET: &str = "JWT_SECRET";
pub const SHARED_INFRA_GROUP: &str = "TOLLGATE_SHARED_INFRA_GROUP";
pub const PERMISSION_CACHE_TTL_SECS: &str = "TOLLGATE_PERMISSION_CACHE_TTL_SECS";
pub const DISABLE_POLL_MS: &str = "TOLLGATE_DISABLE_POLL_MS";
pub const DISABLE_MAX_ATTEMPTS: &str = "TOLLGATE_DISABLE_MAX_ATTEMPTS";
pub const DISABLE_DEADLINE_SECS: &str = "TOLLGATE_DISABLE_DEADLINE_SECS";

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub bind_addr: SocketAddr,
    /// `None` runs on the seeded in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub shared_infra_group: String,
    pub permission_cache_ttl: Duration,
    pub monitor: MonitorConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            shared_infra_group: "shared.infra".to_string(),
            permission_cache_ttl: Duration::from_secs(60),
            monitor: MonitorConfig::default(),
        }
    }
}

impl GateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset or empty variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get(BIND_ADDR) {
            cfg.bind_addr = v.parse().map_err(|e| ConfigError::invalid(BIND_ADDR, &v, e))?;
        }
        cfg.database_url = get(DATABASE_URL);
        match get(JWT_SECRET) {
            Some(secret) => cfg.jwt_secret = secret,
            None => warn!("JWT_SECRET not set; using insecure dev default"),
        }
        if let Some(v) = get(SHARED_INFRA_GROUP) {
            cfg.shared_infra_group = v;
        }
        if let Some(v) = get(PERMISSION_CACHE_TTL_SECS) {
            cfg.permission_cache_ttl = Duration::from_secs(parse(PERMISSION_CACHE_TTL_SECS, &v)?);
        }
        if let Some(v) = get(DISABLE_POLL_MS) {
            let ms: u64 = parse(DISABLE_POLL_MS, &v)?;
            if ms == 0 {
                return Err(ConfigError::invalid(DISABLE_POLL_MS, &v, "must be positive"));
            }
            cfg.monitor.poll_interval = Duration::from_millis(ms);
        }
        if let Some(v) = get(DISABLE_MAX_ATTEMPTS) {
            cfg.monitor.max_attempts = parse(DISABLE_MAX_ATTEMPTS, &v)?;
        }
        if let Some(v) = get(DISABLE_DEADLINE_SECS) {
            cfg.monitor.deadline = Some(Duration::from_secs(parse(DISABLE_DEADLINE_SECS, &v)?));
        }

        Ok(cfg)
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| ConfigError::invalid(var, value, e))
}
