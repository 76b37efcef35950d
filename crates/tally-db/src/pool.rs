//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite, plus the
//! `Database` handle that hands out repositories.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Handle                                    │
//! │                                                                         │
//! │  DbConfig::new(path)                                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ├── SqlitePool (WAL: readers never wait for writers)             │
//! │       ├── product lock ─┐                                              │
//! │       └── bill lock ────┤ shared by every clone of this Database       │
//! │                         ▼                                              │
//! │  db.products() / db.bills() → repositories holding pool + lock         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Local;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use tally_core::stats::{revenue_by_day, DailyRevenue, DashboardStats, RevenueRange};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::bill::BillRepository;
use crate::repository::product::ProductRepository;
use crate::repository::CollectionLock;

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/tally.db")
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

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
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

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1, // In-memory requires single connection
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access.
///
/// Cheap to clone. Clones share the pool and the per-collection write
/// locks, so one `Database` per data file is enough for a whole process.
#[derive(Debug, Clone)]
pub struct Database {
    /// The SQLite connection pool.
    pool: SqlitePool,
    product_lock: CollectionLock,
    bill_lock: CollectionLock,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite:
    ///    - WAL mode for concurrent reads
    ///    - NORMAL synchronous (balance of safety/speed)
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            // May lose the last transaction on power loss, never corrupts
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database {
            pool,
            product_lock: Arc::new(Mutex::new(())),
            bill_lock: Arc::new(Mutex::new(())),
        };

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

    /// Returns a reference to the connection pool.
    ///
    /// Writes that bypass the repositories also bypass the collection
    /// locks. Prefer repository methods.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the product repository.
    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone(), self.product_lock.clone())
    }

    /// Returns the bill repository.
    pub fn bills(&self) -> BillRepository {
        BillRepository::new(self.pool.clone(), self.bill_lock.clone())
    }

    /// Dashboard counters as of now, in the local timezone.
    pub async fn dashboard_stats(&self) -> DbResult<DashboardStats> {
        let products = self.products().get_all().await?;
        let bills = self.bills().get_all().await?;

        Ok(DashboardStats::compute(&bills, &products, &Local::now()))
    }

    /// Revenue per local calendar day over `range`, oldest first.
    pub async fn revenue_by_day(&self, range: RevenueRange) -> DbResult<Vec<DailyRevenue>> {
        let bills = self.bills().get_all().await?;
        Ok(revenue_by_day(&bills, range, &Local::now()))
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use tally_core::{BillDraft, LineItem, Money, Product};

    fn bill_draft(total_minor: i64) -> BillDraft {
        let mut draft = BillDraft::default();
        draft
            .items
            .push(LineItem::manual("Saree", Money::from_minor(total_minor), 1).unwrap());
        draft
    }

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        assert!(db.health_check().await);
        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2)
            .run_migrations(false);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert!(!config.run_migrations);
    }

    #[tokio::test]
    async fn test_dashboard_stats_today_and_yesterday() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let yesterday = now - ChronoDuration::days(1);

        db.bills().create(bill_draft(10000), now).await.unwrap();
        db.bills().create(bill_draft(5000), yesterday).await.unwrap();
        db.products()
            .add(&Product::new("", "Bangles", Money::from_minor(100), 3, now))
            .await
            .unwrap();
        db.products()
            .add(&Product::new("", "Bindi", Money::from_minor(100), 40, now))
            .await
            .unwrap();

        let stats = db.dashboard_stats().await.unwrap();

        assert_eq!(stats.today_revenue.minor(), 10000);
        assert_eq!(stats.today_bills, 1);
        assert_eq!(stats.total_revenue.minor(), 15000);
        assert_eq!(stats.total_products, 2);
        assert_eq!(stats.low_stock, 1);
    }

    #[tokio::test]
    async fn test_revenue_by_day_today() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.bills().create(bill_draft(700), Utc::now()).await.unwrap();

        let series = db.revenue_by_day(RevenueRange::Today).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].revenue.minor(), 700);
    }
}
