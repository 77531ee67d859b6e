//! # DID Pool Manager
//!
//! Hands out free DIDs from the `dids` inventory and takes them back.
//!
//! Acquisition is one conditional `UPDATE ... RETURNING` statement: the
//! random pick of a free row and the flip of `in_use` happen in the same
//! write, so two acquirers can never walk away with the same number even
//! without the router's in-process lock. The `AND in_use = 0` guard on the
//! outer statement is the compare-and-set.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::database::Database;
use crate::error::{Result, RouterError};
use crate::types::{Did, PoolUsage};

#[derive(Clone)]
pub struct DidPool {
    pool: SqlitePool,
}

impl DidPool {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Reserve one free DID and bind it to `destination`.
    ///
    /// Fails with [`RouterError::NoAvailableDid`] when every DID is in use.
    /// No retry happens here.
    pub async fn acquire(&self, destination: &str) -> Result<Did> {
        let now = Utc::now();
        let row = sqlx::query(
            "UPDATE dids
             SET in_use = 1, destination = ?1, updated_at = ?2
             WHERE did = (SELECT did FROM dids WHERE in_use = 0 ORDER BY RANDOM() LIMIT 1)
               AND in_use = 0
             RETURNING did, in_use, destination, country, updated_at",
        )
        .bind(destination)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let did = did_from_row(&row)?;
                debug!(did = %did.value, destination, "DID acquired");
                Ok(did)
            }
            None => Err(RouterError::NoAvailableDid),
        }
    }

    /// Return a DID to the pool. Releasing a free DID is a no-op.
    pub async fn release(&self, did: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE dids
             SET in_use = 0, destination = NULL, updated_at = ?1
             WHERE did = ?2 AND in_use = 1",
        )
        .bind(Utc::now())
        .bind(did)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(did, "DID released");
        }
        Ok(())
    }

    /// Add a DID to the inventory. Re-provisioning an existing DID only
    /// refreshes its country and never touches `in_use`.
    pub async fn provision(&self, did: &str, country: Option<&str>) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO dids (did, in_use, destination, country, created_at, updated_at)
             VALUES (?1, 0, NULL, ?2, ?3, ?3)
             ON CONFLICT(did) DO UPDATE SET
                country = excluded.country,
                updated_at = excluded.updated_at",
        )
        .bind(did)
        .bind(country)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(did, ?country, "DID provisioned");
        Ok(())
    }

    pub async fn get(&self, did: &str) -> Result<Option<Did>> {
        let row = sqlx::query(
            "SELECT did, in_use, destination, country, updated_at FROM dids WHERE did = ?1",
        )
        .bind(did)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(did_from_row).transpose()
    }

    /// Inventory counters for statistics
    pub async fn usage(&self) -> Result<PoolUsage> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN in_use = 1 THEN 1 ELSE 0 END), 0) AS used
             FROM dids",
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let in_use: i64 = row.try_get("used")?;
        Ok(PoolUsage {
            total,
            in_use,
            available: total - in_use,
        })
    }
}

fn did_from_row(row: &SqliteRow) -> Result<Did> {
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(Did {
        value: row.try_get("did")?,
        in_use: row.try_get("in_use")?,
        destination: row.try_get("destination")?,
        country: row.try_get("country")?,
        updated_at,
    })
}
