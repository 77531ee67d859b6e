//! # In-Memory Call Index
//!
//! Two lookup tables mirroring the live subset of the call ledger:
//!
//! ```text
//! by_call_id:  call-id -> CallRecord
//! by_did:      DID     -> call-id
//! ```
//!
//! Both maps sit behind one `RwLock` so neither can be updated without the
//! other. Routing operations take the write guard for their whole critical
//! section (allocation through index update) and call the [`IndexMaps`]
//! methods directly; statistics use the read guard.

use std::collections::HashMap;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{CallRecord, CallStatus};

/// The guarded pair of maps
#[derive(Debug, Default)]
pub struct IndexMaps {
    by_call_id: HashMap<String, CallRecord>,
    by_did: HashMap<String, String>,
}

impl IndexMaps {
    /// Insert or replace a record. Returns the record it displaced, if any.
    ///
    /// A stale DID entry left by the displaced record, or a DID entry still
    /// pointing at another call, is dropped so the maps stay one-to-one.
    pub fn put(&mut self, record: CallRecord) -> Option<CallRecord> {
        let previous = self.by_call_id.remove(&record.call_id);
        if let Some(previous) = &previous {
            if self.by_did.get(&previous.assigned_did) == Some(&previous.call_id) {
                self.by_did.remove(&previous.assigned_did);
            }
        }

        if let Some(other_call) = self.by_did.get(&record.assigned_did).cloned() {
            if other_call != record.call_id {
                self.by_call_id.remove(&other_call);
            }
        }

        self.by_did
            .insert(record.assigned_did.clone(), record.call_id.clone());
        self.by_call_id.insert(record.call_id.clone(), record);
        previous
    }

    pub fn get_by_call_id(&self, call_id: &str) -> Option<&CallRecord> {
        self.by_call_id.get(call_id)
    }

    pub fn get_by_did(&self, did: &str) -> Option<&CallRecord> {
        self.by_did
            .get(did)
            .and_then(|call_id| self.by_call_id.get(call_id))
    }

    /// Change the status of an indexed call. Returns `false` if the call is
    /// not indexed.
    pub fn set_status(&mut self, call_id: &str, status: CallStatus) -> bool {
        match self.by_call_id.get_mut(call_id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, call_id: &str) -> Option<CallRecord> {
        let record = self.by_call_id.remove(call_id)?;
        if self.by_did.get(&record.assigned_did).map(String::as_str) == Some(call_id) {
            self.by_did.remove(&record.assigned_did);
        }
        Some(record)
    }

    pub fn snapshot(&self) -> Vec<CallRecord> {
        self.by_call_id.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_call_id.len()
    }

    pub fn clear(&mut self) {
        self.by_call_id.clear();
        self.by_did.clear();
    }
}

/// Lock-guarded call index shared by the router, reconciler and reaper
#[derive(Debug, Default)]
pub struct CallIndex {
    maps: RwLock<IndexMaps>,
}

impl CallIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access for a multi-step critical section
    pub async fn write(&self) -> RwLockWriteGuard<'_, IndexMaps> {
        self.maps.write().await
    }

    /// Shared access for consistent reads
    pub async fn read(&self) -> RwLockReadGuard<'_, IndexMaps> {
        self.maps.read().await
    }

    pub async fn put(&self, record: CallRecord) -> Option<CallRecord> {
        self.maps.write().await.put(record)
    }

    pub async fn get_by_call_id(&self, call_id: &str) -> Option<CallRecord> {
        self.maps.read().await.get_by_call_id(call_id).cloned()
    }

    pub async fn get_by_did(&self, did: &str) -> Option<CallRecord> {
        self.maps.read().await.get_by_did(did).cloned()
    }

    pub async fn remove(&self, call_id: &str) -> Option<CallRecord> {
        self.maps.write().await.remove(call_id)
    }

    pub async fn snapshot(&self) -> Vec<CallRecord> {
        self.maps.read().await.snapshot()
    }

    pub async fn len(&self) -> usize {
        self.maps.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(call_id: &str, did: &str) -> CallRecord {
        CallRecord::new(call_id, "111", "222", did, "/tmp")
    }

    #[test]
    fn test_put_links_both_maps() {
        let mut maps = IndexMaps::default();
        assert!(maps.put(record("c1", "d1")).is_none());

        assert_eq!(maps.get_by_did("d1").unwrap().call_id, "c1");
        assert_eq!(maps.get_by_call_id("c1").unwrap().assigned_did, "d1");
        assert_eq!(maps.len(), 1);
    }

    #[test]
    fn test_rebinding_call_drops_old_did() {
        let mut maps = IndexMaps::default();
        maps.put(record("c1", "d1"));
        let previous = maps.put(record("c1", "d2")).unwrap();

        assert_eq!(previous.assigned_did, "d1");
        assert!(maps.get_by_did("d1").is_none());
        assert_eq!(maps.get_by_did("d2").unwrap().call_id, "c1");
        assert_eq!(maps.len(), 1);
    }

    #[test]
    fn test_reused_did_evicts_previous_holder() {
        let mut maps = IndexMaps::default();
        maps.put(record("c1", "d1"));
        maps.put(record("c2", "d1"));

        assert!(maps.get_by_call_id("c1").is_none());
        assert_eq!(maps.get_by_did("d1").unwrap().call_id, "c2");
        assert_eq!(maps.len(), 1);
    }

    #[test]
    fn test_remove_clears_did_entry() {
        let mut maps = IndexMaps::default();
        maps.put(record("c1", "d1"));
        assert!(maps.remove("c1").is_some());
        assert!(maps.get_by_did("d1").is_none());
        assert_eq!(maps.len(), 0);
        assert!(maps.remove("c1").is_none());
    }

    #[test]
    fn test_set_status() {
        let mut maps = IndexMaps::default();
        maps.put(record("c1", "d1"));
        assert!(maps.set_status("c1", CallStatus::Forwarded));
        assert_eq!(maps.get_by_did("d1").unwrap().status, CallStatus::Forwarded);
        assert!(!maps.set_status("missing", CallStatus::Forwarded));
    }

    #[tokio::test]
    async fn test_guarded_index_snapshot() {
        let index = CallIndex::new();
        index.put(record("c1", "d1")).await;
        index.put(record("c2", "d2")).await;

        let mut ids: Vec<_> = index.snapshot().await.into_iter().map(|r| r.call_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(index.get_by_did("d2").await.unwrap().call_id, "c2");

        index.remove("c1").await;
        assert_eq!(index.len().await, 1);
    }
}
