//! Infrastructure layer: storage adapters, permission cache, config.

pub mod config;
pub mod memory;
pub mod permission_cache;
pub mod postgres;

pub use config::{ConfigError, GateConfig};
pub use memory::InMemoryStore;
pub use permission_cache::TtlPermissionCache;
pub use postgres::PostgresStore;
