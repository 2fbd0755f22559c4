//! SQLite store adapters for the arbor kernel.

pub mod agent_repository;
pub mod connection;
pub mod group_repository;
pub mod identity_repository;
pub mod migrations;
pub mod policy_repository;
pub mod run_repository;

pub use agent_repository::SqliteAgentRepository;
pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use group_repository::SqliteGroupRepository;
pub use identity_repository::SqliteIdentityRepository;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use policy_repository::SqlitePolicyRepository;
pub use run_repository::SqliteRunRepository;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::DatabaseConfig;

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> KernelResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| KernelError::Serialization(e.to_string()))
}

/// Parse an optional UUID string from a SQLite row field.
pub fn parse_optional_uuid(s: Option<String>) -> KernelResult<Option<Uuid>> {
    s.map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| KernelError::Serialization(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> KernelResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| KernelError::Serialization(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> KernelResult<Option<DateTime<Utc>>> {
    s.map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| KernelError::Serialization(e.to_string()))
}

/// Parse a JSON string from a SQLite row field, falling back to the type's default.
pub fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(s: Option<String>) -> KernelResult<T> {
    s.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| KernelError::Serialization(e.to_string()))
        .map(|opt| opt.unwrap_or_default())
}

/// Whether an sqlx error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),
}

/// Open (creating if missing) and migrate the configured database.
pub async fn initialize_database(config: &DatabaseConfig) -> Result<SqlitePool, DatabaseError> {
    let database_url = format!("sqlite:{}", config.path);
    let pool_config = PoolConfig {
        max_connections: config.max_connections,
        ..PoolConfig::default()
    };
    let pool = create_pool(&database_url, Some(pool_config)).await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

pub async fn initialize_default_database() -> Result<SqlitePool, DatabaseError> {
    initialize_database(&DatabaseConfig::default()).await
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}
