use crate::domain::error::{Result, SyncError};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const CATALOG_SCHEMA_V1: &str = include_str!("../../../resources/schema.sql");
const CATALOG_SCHEMA_VERSION: i64 = 1;

/// Shared handle to the sync database, cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to `sqlite://...` and apply catalog migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| SyncError::Config(format!("Invalid database URL {database_url}: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| SyncError::Database(format!("Failed to connect sync DB: {e}")))?;

        Self::from_pool(pool).await
    }

    pub async fn open(db_path: &Path, max_connections: u32) -> Result<Self> {
        let url = db_path_to_url(db_path)?;
        Self::connect(&url, max_connections).await
    }

    /// Private in-memory database.
    ///
    /// Every SQLite in-memory connection is its own database, so the pool is
    /// pinned to a single connection that is never recycled.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| SyncError::Database(format!("Failed to parse memory DB URL: {e}")))?
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| SyncError::Database(format!("Failed to open memory DB: {e}")))?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        apply_migrations(&pool).await?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| SyncError::Database(format!("Sync DB health check failed: {e}")))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn db_path_to_url(db_path: &Path) -> Result<String> {
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| SyncError::Config("Sync DB path is not valid UTF-8".to_string()))?;

    Ok(format!("sqlite://{}", db_path_str.replace('\\', "/")))
}

async fn apply_migrations(pool: &SqlitePool) -> Result<()> {
    // PRAGMA user_version tracks the catalog schema; v1 == resources/schema.sql.
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .map_err(|e| SyncError::Database(format!("Failed to read sync DB user_version: {e}")))?;

    if version > CATALOG_SCHEMA_VERSION {
        return Err(SyncError::Database(format!(
            "Sync DB schema too new: user_version={} > supported={}",
            version, CATALOG_SCHEMA_VERSION
        )));
    }

    if version < 1 {
        apply_schema(pool, CATALOG_SCHEMA_V1).await?;
        sqlx::query("PRAGMA user_version = 1")
            .execute(pool)
            .await
            .map_err(|e| {
                SyncError::Database(format!("Failed to set sync DB user_version: {e}"))
            })?;
        tracing::info!(version = CATALOG_SCHEMA_VERSION, "Applied sync catalog schema");
    }

    Ok(())
}

async fn apply_schema(pool: &SqlitePool, schema: &str) -> Result<()> {
    for statement in schema.split(';') {
        let stmt = statement.trim();
        if stmt.is_empty() {
            continue;
        }
        sqlx::query(stmt)
            .execute(pool)
            .await
            .map_err(|e| SyncError::Database(format!("Failed to apply catalog schema: {e}")))?;
    }
    Ok(())
}
