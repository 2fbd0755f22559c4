//! Configuration model for the arbor kernel.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Orchestration surface gates and delegation settings
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".arbor/arbor.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Orchestration settings: the two independent surface gates plus grant TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestrationConfig {
    /// Compile-time surface: orchestration nodes in v2 graphs.
    #[serde(default)]
    pub graph_v2: SurfaceGate,

    /// Runtime surface: spawn/join/cancel/replan primitives.
    #[serde(default)]
    pub runtime_primitives: SurfaceGate,

    /// Lifetime of delegation grants minted for spawned children, seconds.
    #[serde(default = "default_grant_ttl_s")]
    pub grant_ttl_s: u32,
}

const fn default_grant_ttl_s() -> u32 {
    3600
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            graph_v2: SurfaceGate::default(),
            runtime_primitives: SurfaceGate::default(),
            grant_ttl_s: default_grant_ttl_s(),
        }
    }
}

/// Enable/disable switch for one orchestration surface, with an optional
/// per-tenant allowlist. An empty allowlist means all tenants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SurfaceGate {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub tenant_allowlist: Vec<Uuid>,
}

const fn default_true() -> bool {
    true
}

impl Default for SurfaceGate {
    fn default() -> Self {
        Self {
            enabled: true,
            tenant_allowlist: Vec::new(),
        }
    }
}

impl SurfaceGate {
    /// Whether the surface is open for the given tenant. A disabled gate
    /// rejects everyone; an allowlisted gate rejects unknown tenants and
    /// callers with no tenant at all.
    pub fn allows(&self, tenant_id: Option<Uuid>) -> bool {
        if !self.enabled {
            return false;
        }
        if self.tenant_allowlist.is_empty() {
            return true;
        }
        match tenant_id {
            Some(t) => self.tenant_allowlist.contains(&t),
            None => false,
        }
    }
}
