//! # Reconciler
//!
//! Bridges the in-memory index and the call ledger: a full rebuild at
//! startup, and a per-DID repair when a returning call misses the index.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, RouterError};
use crate::index::{CallIndex, IndexMaps};
use crate::ledger::CallLedger;
use crate::types::CallRecord;

pub struct Reconciler {
    ledger: CallLedger,
    index: Arc<CallIndex>,
    max_age: Duration,
}

impl Reconciler {
    pub fn new(ledger: CallLedger, index: Arc<CallIndex>, max_age: Duration) -> Self {
        Self {
            ledger,
            index,
            max_age,
        }
    }

    /// Repopulate the index from every live ledger row inside the window.
    /// Must run before the router accepts traffic. Returns the number of
    /// calls restored.
    pub async fn rebuild(&self) -> Result<usize> {
        let records = self.ledger.list_active(self.max_age).await?;

        let mut maps = self.index.write().await;
        let mut restored = 0;
        for record in records {
            if record.assigned_did.is_empty() {
                warn!(call_id = %record.call_id, "Skipping call record without DID");
                continue;
            }
            maps.put(record);
            restored += 1;
        }

        info!("Restored {} active calls from database", restored);
        Ok(restored)
    }

    /// Resolve `did` from the ledger after an index miss and cache the hit.
    ///
    /// The caller already holds the index write guard. Read failures are
    /// logged and reported as an unresolved DID.
    pub async fn repair(&self, maps: &mut IndexMaps, did: &str) -> Result<CallRecord> {
        debug!(did, "DID not found in memory, checking database");

        match self.ledger.find_by_did(did, self.max_age).await {
            Ok(Some(record)) => {
                info!(call_id = %record.call_id, did, "Restored call from database");
                maps.put(record.clone());
                Ok(record)
            }
            Ok(None) => {
                debug!(did, "No live call record for DID");
                Err(RouterError::NoActiveCallForDid(did.to_string()))
            }
            Err(e) => {
                warn!(did, error = %e, "DID lookup failed during repair");
                Err(RouterError::NoActiveCallForDid(did.to_string()))
            }
        }
    }
}
