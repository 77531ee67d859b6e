//! # Routing Engine
//!
//! Correlates the two halves of a forwarded call that reach the router as
//! unrelated requests, minutes apart:
//!
//! ```text
//!  S1 ──(call-id, ANI-1, DNIS-1)──▶ handle_incoming ──▶ S3 (ANI-2 = DNIS-1, DNIS = DID)
//!                                        │ DID bound to call
//!  S3 ──(ANI-2, DID)──────────────▶ handle_return ───▶ S4 (ANI-1, DNIS-1)
//! ```
//!
//! The DID handed out on the first hop is the only thing the returning call
//! carries back, so it is the correlation key. Both operations hold the index
//! write lock from allocation/lookup through the index update, which
//! serializes routing decisions within this process.
//!
//! This serialization does not span processes. Running several routers
//! against one store would need the store to be the sole arbiter of
//! allocation, with the index demoted to a per-instance read cache.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::database::Database;
use crate::error::{Result, RouterError};
use crate::index::{CallIndex, IndexMaps};
use crate::ledger::CallLedger;
use crate::pool::DidPool;
use crate::reaper::{Reaper, ReaperHandle};
use crate::reconciler::Reconciler;
use crate::types::{
    ActiveCallSummary, CallRecord, CallStatus, Did, IncomingResponse, ReturnResponse, RouterStats,
};

const STATUS_SUCCESS: &str = "success";

pub struct CallRouter {
    config: RouterConfig,
    database: Database,
    pool: DidPool,
    ledger: CallLedger,
    index: Arc<CallIndex>,
    reconciler: Reconciler,
}

impl CallRouter {
    /// Build a router over an open store. The index starts empty; call
    /// [`CallRouter::start`] (or [`CallRouter::restore`]) before routing.
    pub fn new(database: Database, config: RouterConfig) -> Self {
        let pool = DidPool::new(&database);
        let ledger = CallLedger::new(&database);
        let index = Arc::new(CallIndex::new());
        let reconciler = Reconciler::new(
            ledger.clone(),
            index.clone(),
            config.lifecycle.call_ttl(),
        );

        Self {
            config,
            database,
            pool,
            ledger,
            index,
            reconciler,
        }
    }

    /// Open the configured store and build a router over it
    pub async fn connect(config: RouterConfig) -> Result<Self> {
        let database = Database::connect(&config.database).await?;
        Ok(Self::new(database, config))
    }

    /// Restore live calls from the ledger, then start the reaper.
    pub async fn start(&self) -> Result<ReaperHandle> {
        self.restore().await?;
        Ok(self.reaper().spawn())
    }

    /// Rebuild the in-memory index from the ledger
    pub async fn restore(&self) -> Result<usize> {
        self.reconciler.rebuild().await
    }

    /// A reaper wired to this router's pool, ledger and index
    pub fn reaper(&self) -> Reaper {
        Reaper::new(
            self.pool.clone(),
            self.ledger.clone(),
            self.index.clone(),
            self.config.lifecycle.call_ttl(),
            self.config.lifecycle.reaper_interval(),
        )
    }

    /// First hop: bind a DID to the call and swap identities.
    ///
    /// The caller is told to send `ANI = dnis` and `DNIS = did`, exactly as
    /// received and allocated.
    pub async fn handle_incoming(
        &self,
        call_id: &str,
        ani: &str,
        dnis: &str,
    ) -> Result<IncomingResponse> {
        let mut maps = self.index.write().await;

        info!("=== STEP 1->2: Processing incoming call ===");
        info!(call_id, ani, dnis, "Incoming call");

        let superseded = match maps.get_by_call_id(call_id).cloned() {
            Some(existing) => Some(existing),
            None => self.live_ledger_record(call_id).await,
        };

        // A retried request keeps the DID it is already holding.
        let held = match &superseded {
            Some(previous) => self.held_binding(&maps, previous).await?,
            None => None,
        };
        let did = match held {
            Some(did) => did,
            None => match self.pool.acquire(dnis).await {
                Ok(did) => did,
                Err(e) => {
                    warn!(call_id, error = %e, "Failed to get available DID");
                    return Err(e);
                }
            },
        };

        let mut record = CallRecord::new(
            call_id,
            ani,
            dnis,
            did.value.clone(),
            &self.config.routing.recording_dir,
        );

        // ... and the identity first seen for this call.
        if let Some(previous) = &superseded {
            record.original_ani = previous.original_ani.clone();
            record.original_dnis = previous.original_dnis.clone();
            info!(
                call_id,
                old_did = %previous.assigned_did,
                new_did = %record.assigned_did,
                "Duplicate incoming call"
            );
        }
        maps.put(record.clone());

        if let Err(e) = self.ledger.create(&record).await {
            let e = RouterError::PersistenceWriteFailed(e.to_string());
            warn!(call_id, error = %e, "Failed to store call record");
        }

        let response = IncomingResponse {
            status: STATUS_SUCCESS.to_string(),
            did_assigned: did.value.clone(),
            next_hop: self.config.routing.forward_next_hop.clone(),
            ani_to_send: dnis.to_string(),
            dnis_to_send: did.value,
        };

        info!(
            "=== TRANSFORMATION: ANI-1={}, DNIS-1={} -> ANI-2={}, DID={} ===",
            ani, dnis, response.ani_to_send, response.dnis_to_send
        );

        maps.set_status(call_id, CallStatus::Forwarded);
        self.persist_status(call_id, CallStatus::Forwarded).await;

        Ok(response)
    }

    /// Final hop: recover the call from its DID and restore its identity.
    pub async fn handle_return(&self, ani2: &str, did: &str) -> Result<ReturnResponse> {
        let ani2 = normalize_number(ani2);
        let did = normalize_number(did);

        let mut maps = self.index.write().await;

        info!("=== STEP 3->4: Processing return call ===");
        info!(ani2 = %ani2, did = %did, "Return call");

        let cached = maps.get_by_did(&did).cloned();
        let record = match cached {
            Some(record) => record,
            None => self.reconciler.repair(&mut maps, &did).await?,
        };

        if ani2 != record.original_dnis {
            warn!(
                call_id = %record.call_id,
                expected = %record.original_dnis,
                got = %ani2,
                "ANI mismatch on return call"
            );
        }

        if record.status != CallStatus::Returned {
            maps.set_status(&record.call_id, CallStatus::Returned);
            self.persist_status(&record.call_id, CallStatus::Returned).await;
        } else {
            debug!(call_id = %record.call_id, "Call already marked returned");
        }

        let response = ReturnResponse {
            status: STATUS_SUCCESS.to_string(),
            next_hop: self.config.routing.return_next_hop.clone(),
            ani_to_send: record.original_ani.clone(),
            dnis_to_send: record.original_dnis.clone(),
        };

        info!(
            "=== RESTORATION: ANI-2={}, DID={} -> ANI-1={}, DNIS-1={} ===",
            ani2, did, response.ani_to_send, response.dnis_to_send
        );

        Ok(response)
    }

    /// Mark a call completed, release its DID and retire it from memory.
    pub async fn handle_complete(&self, call_id: &str) -> Result<CallRecord> {
        let mut maps = self.index.write().await;

        let mut record = match maps.remove(call_id) {
            Some(record) => record,
            None => match self.ledger.get(call_id).await? {
                Some(record) if !record.status.is_terminal() => record,
                _ => return Err(RouterError::CallNotFound(call_id.to_string())),
            },
        };

        self.persist_status(call_id, CallStatus::Completed).await;
        if let Err(e) = self.pool.release(&record.assigned_did).await {
            warn!(did = %record.assigned_did, error = %e, "Failed to release DID");
        }

        let now = Utc::now();
        record.status = CallStatus::Completed;
        record.end_time = Some(now);
        record.duration = (now - record.start_time).num_seconds().max(0);

        info!(call_id, did = %record.assigned_did, duration = record.duration, "Call completed");
        Ok(record)
    }

    /// Active-call count, pool utilization and today's totals.
    pub async fn statistics(&self) -> Result<RouterStats> {
        let (active_calls, memory_calls) = {
            let maps = self.index.read().await;
            let calls: Vec<ActiveCallSummary> =
                maps.snapshot().iter().map(ActiveCallSummary::from).collect();
            (maps.len(), calls)
        };

        let usage = self.pool.usage().await?;
        let calls_today = self.ledger.calls_today().await?;
        let completed_today = self.ledger.completed_today().await?;

        Ok(RouterStats {
            active_calls,
            total_dids: usage.total,
            used_dids: usage.in_use,
            available_dids: usage.available,
            pool_utilization: usage.utilization(),
            calls_today,
            completed_today,
            timestamp: Utc::now(),
            memory_calls,
        })
    }

    async fn live_ledger_record(&self, call_id: &str) -> Option<CallRecord> {
        match self.ledger.get(call_id).await {
            Ok(record) => record.filter(|r| !r.status.is_terminal()),
            Err(e) => {
                debug!(call_id, error = %e, "Ledger lookup for duplicate call failed");
                None
            }
        }
    }

    /// The DID `previous` is bound to, if the pool still has it in use and
    /// no other indexed call has taken it over.
    async fn held_binding(
        &self,
        maps: &IndexMaps,
        previous: &CallRecord,
    ) -> Result<Option<Did>> {
        if let Some(holder) = maps.get_by_did(&previous.assigned_did) {
            if holder.call_id != previous.call_id {
                return Ok(None);
            }
        }
        Ok(self
            .pool
            .get(&previous.assigned_did)
            .await?
            .filter(|did| did.in_use))
    }

    async fn persist_status(&self, call_id: &str, status: CallStatus) {
        if let Err(e) = self.ledger.update_status(call_id, status).await {
            warn!(call_id, %status, error = %e, "Failed to persist call status");
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn pool(&self) -> &DidPool {
        &self.pool
    }

    pub fn ledger(&self) -> &CallLedger {
        &self.ledger
    }

    pub fn index(&self) -> &Arc<CallIndex> {
        &self.index
    }
}

/// Strip transport artifacts from a number received on the return leg.
pub fn normalize_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number("  5551234\r\n"), "5551234");
        assert_eq!(normalize_number("555\n1234"), "5551234");
        assert_eq!(normalize_number("+15551234"), "+15551234");
        assert_eq!(normalize_number("\r\n"), "");
    }
}
