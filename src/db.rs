//! Database connection and pool management for the job store.
//!
//! This module provides functionality to initialize and manage a SeaORM
//! connection pool (Postgres or SQLite) and to bring the schema up to date.

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;
use crate::seeds::seed_initiator;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Storage backends the job store runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
    /// `sqlite::memory:` and `mode=memory` URLs; every connection sees its
    /// own database, so the pool is pinned to a single connection.
    SqliteMemory,
}

impl Backend {
    /// Classifies a connection URL by scheme.
    pub fn from_url(url: &str) -> Result<Self, DatabaseError> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" if url.contains(":memory:") || url.contains("mode=memory") => {
                Ok(Self::SqliteMemory)
            }
            "sqlite" => Ok(Self::Sqlite),
            other => Err(DatabaseError::InvalidConfiguration {
                message: format!("unsupported database scheme '{}'", other),
            }),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::SqliteMemory => "sqlite (in-memory)",
        }
    }
}

const CONNECT_ATTEMPTS: u32 = 5;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Opens the job store's connection pool.
///
/// The backend is derived from `database_url`; in-memory SQLite gets a
/// single connection. Connection failures are retried with exponential
/// backoff before giving up.
///
/// ```no_run
/// use jobstore::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let db = init_pool(&AppConfig::default()).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.trim().is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }
    let backend = Backend::from_url(&cfg.database_url)?;

    let max_connections = match backend {
        Backend::SqliteMemory => 1,
        Backend::Postgres | Backend::Sqlite => cfg.db_max_connections,
    };
    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    log::info!(
        "Opening {} job store pool (max {} connections)",
        backend.name(),
        max_connections
    );
    connect_with_retry(opt, backend).await
}

async fn connect_with_retry(opt: ConnectOptions, backend: Backend) -> Result<DatabaseConnection> {
    let mut delay = INITIAL_RETRY_DELAY;
    let mut attempt = 1;
    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!("Connected to {} (attempt {})", backend.name(), attempt);
                return Ok(conn);
            }
            Err(source) if attempt >= CONNECT_ATTEMPTS => {
                log::error!(
                    "Giving up on {} after {} attempts: {}",
                    backend.name(),
                    attempt,
                    source
                );
                return Err(DatabaseError::ConnectionFailed { source }.into());
            }
            Err(err) => {
                log::warn!(
                    "Connecting to {} failed (attempt {}): {}; retrying in {:?}",
                    backend.name(),
                    attempt,
                    err,
                    delay
                );
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Applies pending migrations and seeds the Initiator job.
pub async fn prepare_schema(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .context("Failed to apply migrations")?;
    seed_initiator(db)
        .await
        .context("Failed to seed the initiator job")?;
    Ok(())
}

/// Health check for the database connection.
///
/// Runs `SELECT 1` on the pool.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_database_url() {
        let config = AppConfig {
            database_url: "".to_string(),
            ..AppConfig::default()
        };

        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(init_pool(&config));

        assert!(matches!(
            result.unwrap_err().downcast::<DatabaseError>(),
            Ok(DatabaseError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn classifies_backends_by_scheme() {
        assert_eq!(
            Backend::from_url("postgres://u:p@db:5432/jobs").unwrap(),
            Backend::Postgres
        );
        assert_eq!(
            Backend::from_url("sqlite://jobstore.db?mode=rwc").unwrap(),
            Backend::Sqlite
        );
        assert_eq!(
            Backend::from_url("sqlite::memory:").unwrap(),
            Backend::SqliteMemory
        );
        assert!(matches!(
            Backend::from_url("mysql://db/jobs"),
            Err(DatabaseError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn in_memory_pool_is_usable_after_preparation() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            ..AppConfig::default()
        };
        let db = init_pool(&config).await.unwrap();
        prepare_schema(&db).await.unwrap();
        health_check(&db).await.unwrap();
    }

    #[tokio::test]
    async fn prepares_schema_idempotently() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        prepare_schema(&db).await.unwrap();
        prepare_schema(&db).await.unwrap();
        health_check(&db).await.unwrap();
    }
}
