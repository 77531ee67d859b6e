//! # Call Ledger
//!
//! Durable record of every call's lifecycle in the `call_records` table.
//!
//! Lookups used for correlation (`find_by_did`, `list_active`) only consider
//! non-terminal rows that started inside the supplied window, which bounds how
//! long a stale DID binding can be resurrected after a restart.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::Result;
use crate::types::{CallRecord, CallStatus};

const RECORD_COLUMNS: &str = "call_id, original_ani, original_dnis, assigned_did, status, \
     start_time, end_time, duration, recording_path";

#[derive(Clone)]
pub struct CallLedger {
    pool: SqlitePool,
}

impl CallLedger {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Insert a call record, or overwrite the mutable fields of an existing
    /// one with the same call id. While the existing row is live, ANI/DNIS and
    /// the recording path keep their first-seen values; the DID binding,
    /// status and start time are replaced. A terminal row is a finished call,
    /// so a new call reusing its id overwrites every field.
    pub async fn create(&self, record: &CallRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO call_records
                (call_id, original_ani, original_dnis, assigned_did, status,
                 start_time, end_time, duration, recording_path, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(call_id) DO UPDATE SET
                original_ani = CASE WHEN call_records.status IN (?11, ?12)
                    THEN excluded.original_ani ELSE call_records.original_ani END,
                original_dnis = CASE WHEN call_records.status IN (?11, ?12)
                    THEN excluded.original_dnis ELSE call_records.original_dnis END,
                recording_path = CASE WHEN call_records.status IN (?11, ?12)
                    THEN excluded.recording_path ELSE call_records.recording_path END,
                assigned_did = excluded.assigned_did,
                status = excluded.status,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                duration = excluded.duration,
                updated_at = excluded.updated_at",
        )
        .bind(&record.call_id)
        .bind(&record.original_ani)
        .bind(&record.original_dnis)
        .bind(&record.assigned_did)
        .bind(record.status.as_str())
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.duration)
        .bind(&record.recording_path)
        .bind(Utc::now())
        .bind(CallStatus::Completed.as_str())
        .bind(CallStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;

        debug!(call_id = %record.call_id, did = %record.assigned_did, "Call record stored");
        Ok(())
    }

    /// Move a call to `status`. Terminal states also stamp `end_time` and
    /// `duration`.
    ///
    /// Returns `false` (and logs) when no row with `call_id` exists or the
    /// state machine forbids the move, e.g. out of `COMPLETED`. This is a
    /// soft failure the caller is not expected to propagate. Re-applying the
    /// current status is accepted without touching the row.
    pub async fn update_status(&self, call_id: &str, status: CallStatus) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status, start_time FROM call_records WHERE call_id = ?1")
            .bind(call_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            warn!(call_id, %status, "Status update for unknown call ignored");
            return Ok(false);
        };
        let current: CallStatus = row.try_get::<String, _>("status")?.parse()?;
        let start_time: DateTime<Utc> = row.try_get("start_time")?;

        if current == status {
            tx.rollback().await?;
            debug!(call_id, %status, "Call already in requested status");
            return Ok(true);
        }
        if !current.can_transition_to(status) {
            tx.rollback().await?;
            warn!(call_id, from = %current, to = %status, "Illegal status transition ignored");
            return Ok(false);
        }

        if status.is_terminal() {
            sqlx::query(
                "UPDATE call_records
                 SET status = ?1, end_time = ?2, duration = ?3, updated_at = ?2
                 WHERE call_id = ?4",
            )
            .bind(status.as_str())
            .bind(now)
            .bind(elapsed_secs(start_time, now))
            .bind(call_id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query("UPDATE call_records SET status = ?1, updated_at = ?2 WHERE call_id = ?3")
                .bind(status.as_str())
                .bind(now)
                .bind(call_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(call_id, %status, "Call status updated");
        Ok(true)
    }

    pub async fn get(&self, call_id: &str) -> Result<Option<CallRecord>> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM call_records WHERE call_id = ?1");
        let row = sqlx::query(&query)
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Newest live call bound to `did` that started within `max_age`.
    pub async fn find_by_did(&self, did: &str, max_age: Duration) -> Result<Option<CallRecord>> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM call_records
             WHERE assigned_did = ?1
               AND status IN (?2, ?3, ?4)
               AND start_time > ?5
             ORDER BY start_time DESC
             LIMIT 1"
        );
        let [active, forwarded, returned] = CallStatus::NON_TERMINAL;
        let row = sqlx::query(&query)
            .bind(did)
            .bind(active.as_str())
            .bind(forwarded.as_str())
            .bind(returned.as_str())
            .bind(cutoff(max_age))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Every live call that started within `max_age`, oldest first.
    ///
    /// Rows that cannot be decoded are skipped with a warning.
    pub async fn list_active(&self, max_age: Duration) -> Result<Vec<CallRecord>> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM call_records
             WHERE status IN (?1, ?2, ?3)
               AND start_time > ?4
             ORDER BY start_time ASC"
        );
        let [active, forwarded, returned] = CallStatus::NON_TERMINAL;
        let rows = sqlx::query(&query)
            .bind(active.as_str())
            .bind(forwarded.as_str())
            .bind(returned.as_str())
            .bind(cutoff(max_age))
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match record_from_row(row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let call_id: Option<String> = row.try_get("call_id").ok();
                    warn!(?call_id, error = %e, "Skipping malformed call record");
                }
            }
        }
        Ok(records)
    }

    /// Fail every live call older than `ttl` and return the expired records
    /// with their final state.
    pub async fn expire_stale(&self, ttl: Duration) -> Result<Vec<CallRecord>> {
        let now = Utc::now();
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM call_records
             WHERE status IN (?1, ?2, ?3)
               AND start_time < ?4"
        );
        let [active, forwarded, returned] = CallStatus::NON_TERMINAL;

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(&query)
            .bind(active.as_str())
            .bind(forwarded.as_str())
            .bind(returned.as_str())
            .bind(cutoff_from(now, ttl))
            .fetch_all(&mut *tx)
            .await?;

        let mut expired = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = match record_from_row(row) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed call record during expiry");
                    continue;
                }
            };

            let duration = elapsed_secs(record.start_time, now);
            sqlx::query(
                "UPDATE call_records
                 SET status = ?1, end_time = ?2, duration = ?3, updated_at = ?2
                 WHERE call_id = ?4 AND status = ?5",
            )
            .bind(CallStatus::Failed.as_str())
            .bind(now)
            .bind(duration)
            .bind(&record.call_id)
            .bind(record.status.as_str())
            .execute(&mut *tx)
            .await?;

            record.status = CallStatus::Failed;
            record.end_time = Some(now);
            record.duration = duration;
            expired.push(record);
        }
        tx.commit().await?;

        if !expired.is_empty() {
            info!("Expired {} stale calls", expired.len());
        }
        Ok(expired)
    }

    /// Calls started since midnight UTC
    pub async fn calls_today(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM call_records WHERE start_time >= ?1")
            .bind(start_of_today())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Calls started since midnight UTC that reached `COMPLETED`
    pub async fn completed_today(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM call_records WHERE start_time >= ?1 AND status = ?2",
        )
        .bind(start_of_today())
        .bind(CallStatus::Completed.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<CallRecord> {
    let status: String = row.try_get("status")?;
    Ok(CallRecord {
        call_id: row.try_get("call_id")?,
        original_ani: row.try_get("original_ani")?,
        original_dnis: row.try_get("original_dnis")?,
        assigned_did: row.try_get("assigned_did")?,
        status: status.parse()?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        duration: row.try_get("duration")?,
        recording_path: row.try_get("recording_path")?,
    })
}

fn cutoff(max_age: Duration) -> DateTime<Utc> {
    cutoff_from(Utc::now(), max_age)
}

fn cutoff_from(now: DateTime<Utc>, max_age: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(max_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn elapsed_secs(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_seconds().max(0)
}

fn start_of_today() -> DateTime<Utc> {
    let today = Utc::now().date_naive();
    today
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or_else(Utc::now)
}
