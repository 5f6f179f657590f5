//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  Engine startup                                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbConfig::new(path) ← Configure pool settings                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │                           │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │  (max_connections)        │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │       │                                                                 │
//! │       ├── db.begin()      one write transaction per engine operation   │
//! │       ├── db.orders()     pooled reads for observers                   │
//! │       └── db.change_log() relay cursor reads                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! File databases use WAL so observers' reads never block the writer.
//! Write transactions open with `BEGIN IMMEDIATE`: every command reads
//! before it writes, and a deferred transaction that another writer beat
//! to the lock could never upgrade. Taking the write lock up front makes
//! concurrent commands queue on the busy timeout instead.
//! In-memory databases (tests) live on a single connection that is never
//! recycled, since closing it would drop the data.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::bills::BillRepository;
use crate::repository::change_log::ChangeLogRepository;
use crate::repository::inventory::InventoryRepository;
use crate::repository::menu::MenuRepository;
use crate::repository::orders::OrderRepository;
use crate::repository::settings::SettingsRepository;
use crate::repository::tables::TableRepository;

const IN_MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/tavola.db")
///     .max_connections(5)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection timeout duration.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// How long a writer waits for the write lock before giving up.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets how long a writer waits for the write lock.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// ## Usage
    /// ```rust,ignore
    /// let db = Database::new(DbConfig::in_memory()).await?;
    /// ```
    ///
    /// There is exactly one connection. Code holding a transaction must not
    /// call a pooled repository method until it commits.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(IN_MEMORY_PATH),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_PATH
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access and transactions.
///
/// Cheap to clone; every clone shares the same pool.
#[derive(Debug, Clone)]
pub struct Database {
    /// The SQLite connection pool.
    pool: SqlitePool,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite:
    ///    - WAL mode for concurrent reads (file databases)
    ///    - NORMAL synchronous
    ///    - Foreign keys enabled
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let in_memory = config.is_in_memory();

        let connect_options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
                .foreign_keys(true)
        } else {
            let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());
            SqliteConnectOptions::from_str(&connect_url)
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                // SQLite has them disabled by default for backwards compatibility
                .foreign_keys(true)
                .busy_timeout(config.busy_timeout)
                .create_if_missing(true)
        };

        debug!(in_memory, "Connection options configured");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout);

        pool_options = if in_memory {
            pool_options.idle_timeout(None).max_lifetime(None)
        } else {
            pool_options.idle_timeout(Some(config.idle_timeout))
        };

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Starts a write transaction holding the write lock.
    ///
    /// Dropping the transaction without `commit` rolls everything back,
    /// including the change-log rows written through it. Fails with
    /// [`DbError::Busy`] when another writer held the lock for longer than
    /// the busy timeout.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        begin_immediate(&self.pool).await
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.pool.clone())
    }

    pub fn tables(&self) -> TableRepository {
        TableRepository::new(self.pool.clone())
    }

    pub fn menu(&self) -> MenuRepository {
        MenuRepository::new(self.pool.clone())
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    pub fn bills(&self) -> BillRepository {
        BillRepository::new(self.pool.clone())
    }

    pub fn inventory(&self) -> InventoryRepository {
        InventoryRepository::new(self.pool.clone())
    }

    /// Returns the change-log (outbox) repository.
    pub fn change_log(&self) -> ChangeLogRepository {
        ChangeLogRepository::new(self.pool.clone())
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}

/// Commits a transaction, mapping failure to [`DbError::TransactionFailed`].
pub async fn commit(tx: Transaction<'static, Sqlite>) -> DbResult<()> {
    tx.commit().await.map_err(transaction_error)
}

/// `BEGIN IMMEDIATE` on a pooled connection. Repository writes outside an
/// engine command go through here too.
pub(crate) async fn begin_immediate(pool: &SqlitePool) -> DbResult<Transaction<'static, Sqlite>> {
    pool.begin_with("BEGIN IMMEDIATE")
        .await
        .map_err(transaction_error)
}

fn transaction_error(err: sqlx::Error) -> DbError {
    match DbError::from(err) {
        busy @ DbError::Busy(_) => busy,
        other => DbError::TransactionFailed(other.to_string()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(db.pool()).await.unwrap();
        assert_eq!(one, 1);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert!(!config.is_in_memory());
        assert!(DbConfig::in_memory().is_in_memory());
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        {
            let mut tx = db.begin().await.unwrap();
            sqlx::query("INSERT INTO shops (id, name, created_at) VALUES ('s', 'S', '2024-01-01T00:00:00Z')")
                .execute(&mut *tx)
                .await
                .unwrap();
        }
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shops")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_writers_queue_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tavola.db");
        let first = Database::new(DbConfig::new(&path)).await.unwrap();
        let second = Database::new(
            DbConfig::new(&path)
                .run_migrations(false)
                .busy_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();

        let held = first.begin().await.unwrap();
        let err = second.begin().await.unwrap_err();
        assert!(matches!(err, DbError::Busy(_)), "got {:?}", err);
        assert!(err.is_retryable());

        commit(held).await.unwrap();
        let tx = second.begin().await.unwrap();
        commit(tx).await.unwrap();
    }
}
