//! Database connection pool management
//!
//! Provides a wrapper around SQLx's SqlitePool with:
//! - Automatic directory creation for database files
//! - WAL journal mode for concurrent reads
//! - Automatic schema migration on first connection
//! - In-memory mode for testing

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

/// Errors raised while establishing the pool or preparing the schema.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),
}

/// Manages a pool of SQLite connections for the bucket store.
///
/// The pool is configured with WAL journal mode so health checks, admin
/// reads and admission decrements can proceed concurrently, plus a busy
/// timeout to ride out write contention between admission handlers.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Creates a pool connected to the database file at `db_path`.
    ///
    /// Parent directories and the file itself are created on demand, and
    /// the schema migration runs before the pool is handed out.
    pub async fn new(
        db_path: &Path,
        max_conns: u32,
        busy_timeout: Duration,
    ) -> Result<Self, PoolError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PoolError::ConnectionFailed(format!(
                        "failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_conns)
            .connect_with(options)
            .await
            .map_err(|e| {
                PoolError::ConnectionFailed(format!(
                    "failed to connect to database at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::info!(path = %db_path.display(), "database pool initialized");

        Ok(Self { pool })
    }

    /// Creates an in-memory database pool for testing.
    ///
    /// Uses a single connection to ensure data persistence across queries
    /// (SQLite in-memory databases are per-connection).
    pub async fn in_memory() -> Result<Self, PoolError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                PoolError::ConnectionFailed(format!("failed to create in-memory database: {e}"))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::debug!("in-memory database pool initialized");

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying SQLite connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), PoolError> {
        let migration_sql = include_str!("migrations/20260110_token_buckets.sql");
        sqlx::raw_sql(migration_sql)
            .execute(pool)
            .await
            .map_err(|e| PoolError::MigrationFailed(e.to_string()))?;

        tracing::debug!("database migrations completed");
        Ok(())
    }
}
