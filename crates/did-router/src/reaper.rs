//! # Reaper
//!
//! Periodic task that fails calls which outlived the TTL and returns their
//! DIDs to the pool. Nothing else reclaims a DID whose call never came back.
//!
//! The task is tied to a [`CancellationToken`]; [`ReaperHandle::shutdown`]
//! stops it and waits for the current tick to finish.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::index::CallIndex;
use crate::ledger::CallLedger;
use crate::pool::DidPool;

/// Outcome of one reaper pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Calls failed in the ledger
    pub expired: usize,
    /// Stale calls only known to the index
    pub evicted: usize,
    /// DIDs returned to the pool
    pub released: usize,
}

pub struct Reaper {
    pool: DidPool,
    ledger: CallLedger,
    index: Arc<CallIndex>,
    ttl: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(
        pool: DidPool,
        ledger: CallLedger,
        index: Arc<CallIndex>,
        ttl: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            ledger,
            index,
            ttl,
            interval,
        }
    }

    /// Run one expiry pass under the index write lock.
    pub async fn tick(&self) -> Result<ReapReport> {
        let mut maps = self.index.write().await;
        let mut report = ReapReport::default();

        let expired = self.ledger.expire_stale(self.ttl).await?;
        report.expired = expired.len();
        for record in &expired {
            // The ledger row can lag behind the index when a write failed:
            // the call may have moved to another DID, or its old DID may
            // already belong to another live call. Only touch what the
            // expired row still owns.
            if maps
                .get_by_call_id(&record.call_id)
                .is_some_and(|cached| cached.assigned_did == record.assigned_did)
            {
                maps.remove(&record.call_id);
            }
            if let Some(holder) = maps.get_by_did(&record.assigned_did) {
                debug!(
                    call_id = %record.call_id,
                    did = %record.assigned_did,
                    holder = %holder.call_id,
                    "DID of expired call is held by another call, not releasing"
                );
                continue;
            }
            match self.pool.release(&record.assigned_did).await {
                Ok(()) => report.released += 1,
                Err(e) => warn!(did = %record.assigned_did, error = %e, "Failed to release DID"),
            }
        }

        // Calls whose ledger write failed never show up in the scan above.
        let ttl = ChronoDuration::from_std(self.ttl).ok();
        let now = Utc::now();
        let stale: Vec<_> = maps
            .snapshot()
            .into_iter()
            .filter(|record| ttl.is_some_and(|ttl| record.is_older_than(ttl, now)))
            .collect();
        for record in stale {
            maps.remove(&record.call_id);
            report.evicted += 1;
            match self.pool.release(&record.assigned_did).await {
                Ok(()) => report.released += 1,
                Err(e) => warn!(did = %record.assigned_did, error = %e, "Failed to release DID"),
            }
        }

        if report.expired > 0 || report.evicted > 0 {
            info!(
                expired = report.expired,
                evicted = report.evicted,
                released = report.released,
                "Cleaned up stale calls"
            );
        }
        Ok(report)
    }

    /// Start the periodic task.
    pub fn spawn(self) -> ReaperHandle {
        let token = CancellationToken::new();
        let child = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so startup is not
            // followed by an instant scan.
            ticker.tick().await;

            info!(interval = ?self.interval, ttl = ?self.ttl, "Reaper started");
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            error!(error = %e, "Error cleaning up stale calls");
                        }
                    }
                }
            }
            debug!("Reaper stopped");
        });

        ReaperHandle { token, task }
    }
}

/// Shutdown hook for a running reaper
pub struct ReaperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Cancel the task and wait for it to exit
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Reaper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
