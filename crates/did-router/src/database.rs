//! # Persistent Store Handle
//!
//! Owns the sqlx SQLite connection pool shared by the DID pool manager and
//! the call ledger, and applies the embedded schema migrations when opened.
//!
//! ```rust,no_run
//! use rvoip_did_router::{config::DatabaseConfig, database::Database};
//!
//! # async fn example() -> rvoip_did_router::Result<()> {
//! let db = Database::connect(&DatabaseConfig {
//!     url: "sqlite:///var/lib/did-router/router.db?mode=rwc".to_string(),
//!     ..Default::default()
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Cloneable handle to the backing store
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the store and run migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("🗄️ Opening DID router database: {}", config.url);

        let options = SqliteConnectOptions::from_str(&config.url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("✅ Database ready (WAL mode enabled)");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
