//! SQLite connection pool for the block graph
//!
//! One pool per process. Every pooled connection gets the same pragmas
//! (WAL, foreign keys, busy timeout), so relation cascades and storage
//! restrictions hold no matter which connection runs a batch.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::debug;

use crate::config::DatabaseSettings;
use crate::storage::migrations::{self, MigrationStatus};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the graph lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    /// Private to a single connection; gone when it closes
    Memory,
}

impl Location {
    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        Ok(match self {
            Location::Memory => SqliteConnectOptions::from_str("sqlite::memory:")?,
            Location::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub location: Location,
    pub max_connections: u32,
    /// Bring the schema up to date on open
    pub auto_migrate: bool,
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            auto_migrate: true,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Build from the `[database]` section of the config file
    pub fn from_settings(settings: &DatabaseSettings) -> Result<Self> {
        Ok(Self::with_path(settings.resolved_path()?).max_connections(settings.max_connections))
    }

    /// Single-connection in-memory graph, for tests
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            max_connections: 1,
            auto_migrate: true,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        // A memory database is per connection, so it never gets a second one
        self.max_connections = match self.location {
            Location::Memory => 1,
            Location::File(_) => max.max(1),
        };
        self
    }

    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }
}

/// Connection pool plus the config it was opened with
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if let Location::File(path) = &config.location {
            ensure_parent_dir(path)?;
        }

        let options = config
            .location
            .connect_options()?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open graph database at {:?}", config.location))?;

        let db = Self { pool, config };

        if db.config.auto_migrate {
            db.migrate().await?;
        }

        debug!(
            location = ?db.config.location,
            max_connections = db.config.max_connections,
            "Graph database opened"
        );
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Failed to migrate the graph schema")
    }

    pub async fn migration_status(&self) -> Result<MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to read the graph schema version")
    }

    /// Round-trip a trivial query through the pool
    pub async fn health_check(&self) -> Result<()> {
        let (one,): (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Graph database is not answering")?;
        debug!(one, "Database health check");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// File path, or `:memory:`
    pub fn path(&self) -> &Path {
        match &self.config.location {
            Location::File(path) => path,
            Location::Memory => Path::new(":memory:"),
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::in_memory().await.unwrap();
        db.health_check().await.unwrap();

        let status = db.migration_status().await.unwrap();
        assert!(!status.needs_migration);
        assert_eq!(db.path(), Path::new(":memory:"));
    }

    #[test]
    fn test_config_builder() {
        let config = DatabaseConfig::with_path("/tmp/inkcre-test.db")
            .max_connections(10)
            .no_migrate();

        assert_eq!(config.location, Location::File(PathBuf::from("/tmp/inkcre-test.db")));
        assert_eq!(config.max_connections, 10);
        assert!(!config.auto_migrate);
    }

    #[test]
    fn test_memory_stays_single_connection() {
        let config = DatabaseConfig::in_memory().max_connections(8);
        assert_eq!(config.max_connections, 1);
        assert_eq!(DatabaseConfig::with_path("g.db").max_connections(0).max_connections, 1);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = DatabaseSettings {
            path: Some(PathBuf::from("/tmp/graph.db")),
            max_connections: 3,
        };
        let config = DatabaseConfig::from_settings(&settings).unwrap();
        assert_eq!(config.location, Location::File(PathBuf::from("/tmp/graph.db")));
        assert_eq!(config.max_connections, 3);
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let db = Database::in_memory().await.unwrap();

        let (enabled,): (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("inkcre.db");

        let db = Database::new(DatabaseConfig::with_path(&path)).await.unwrap();
        db.health_check().await.unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), path.as_path());
        db.close().await;
    }
}
