//! Database layer
//!
//! Provides:
//! - SeaORM entity models
//! - Storage seams (`DocumentCatalog`, `RoutineDraftWriter`) with PostgreSQL
//!   and in-memory implementations
//! - Connection pool management and migrations

mod catalog;
mod memory;
pub mod models;
mod repository;

pub use catalog::{DocumentCatalog, NewAsset, NewDocument, RoutineDraftWriter, SavedRoutine};
pub use memory::{MemoryCatalog, MemoryRoutineWriter, StoredRoutine};
pub use repository::Repository;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");
        let primary = connect(&config.url, config, "primary").await?;

        let replica = match config.read_url.as_deref() {
            Some(read_url) if !read_url.is_empty() => {
                info!("Connecting to read replica...");
                Some(connect(read_url, config, "replica").await?)
            }
            _ => None,
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Raw sqlx pool behind the primary connection, for pgvector queries
    pub fn pg_pool(&self) -> &sqlx::PgPool {
        self.primary.get_postgres_connection_pool()
    }

    /// Raw sqlx pool used for vector reads
    pub fn pg_read_pool(&self) -> &sqlx::PgPool {
        self.read().get_postgres_connection_pool()
    }

    /// Apply pending migrations from `migrations/`
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(self.pg_pool())
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Migration failed: {}", e),
            })?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }
}

async fn connect(url: &str, config: &DatabaseConfig, role: &str) -> Result<DatabaseConnection> {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);

    Database::connect(opts)
        .await
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("Failed to connect to {}: {}", role, e),
        })
}
