//! Port registry: the durable `port → PortRecord` mapping
//!
//! The prober keeps records fresh through [`PortRegistry::upsert_observed`]
//! and [`PortRegistry::delete_stale`]; the share API mutates sharing state;
//! the gateway reads a record on every proxied request.
//!
//! Two backends are provided:
//! - [`MemoryRegistry`]: process-local, lost on restart (default)
//! - [`DbRegistry`]: SeaORM over SQLite or PostgreSQL
//!   (`"sqlite://./homeport.db?mode=rwc"`, `"postgres://..."`, `"sqlite::memory:"`)

pub mod db;
pub mod entities;
pub mod memory;
pub mod migrator;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homeport_proto::{ObservedPort, PortRecord, ShareSettings};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr};
use thiserror::Error;
use tracing::info;

pub use db::DbRegistry;
pub use memory::MemoryRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry storage error: {0}")]
    Storage(String),

    #[error("Stored record for port {port} is corrupt: {reason}")]
    Corrupt { port: i64, reason: String },
}

impl From<DbErr> for RegistryError {
    fn from(err: DbErr) -> Self {
        RegistryError::Storage(err.to_string())
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[async_trait]
pub trait PortRegistry: Send + Sync {
    async fn get(&self, port: u16) -> RegistryResult<Option<PortRecord>>;

    /// All records ordered by port
    async fn list(&self) -> RegistryResult<Vec<PortRecord>>;

    /// Insert a fresh private record or refresh metadata and `last_seen`
    /// of an existing one. Sharing state and `first_seen` are preserved.
    async fn upsert_observed(
        &self,
        observed: &ObservedPort,
        now: DateTime<Utc>,
    ) -> RegistryResult<PortRecord>;

    /// Overwrite the sharing state of `port`, creating the record if the
    /// prober has not reported the port yet.
    async fn set_share(
        &self,
        port: u16,
        settings: &ShareSettings,
        now: DateTime<Utc>,
    ) -> RegistryResult<PortRecord>;

    /// Reset `port` to private and clear hash and expiry.
    ///
    /// Returns `None` when no record exists. A record that is already
    /// private at rest is returned untouched.
    async fn unshare(&self, port: u16) -> RegistryResult<Option<PortRecord>>;

    /// Delete every record whose `last_seen` is older than `cutoff` and
    /// return the deleted ports.
    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> RegistryResult<Vec<u16>>;
}

/// Initialize database connection
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;

    let backend = db.get_database_backend();
    info!("Connected to registry database backend: {:?}", backend);

    Ok(db)
}

/// Run migrations
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    use sea_orm_migration::MigratorTrait;

    info!("Running registry migrations...");
    migrator::Migrator::up(db, None).await?;
    info!("Registry migrations completed");

    Ok(())
}
