//! Tests for stale call expiry and DID reclamation

mod common;

use chrono::{Duration, Utc};
use common::create_test_router;
use rvoip_did_router::{CallRecord, CallRouter, CallStatus, ReapReport};

/// Bind `did` to a call that started `minutes_ago`, optionally skipping the
/// ledger write to mimic a failed persistence.
async fn seed_call(router: &CallRouter, call_id: &str, minutes_ago: i64, persist: bool) -> CallRecord {
    let did = router.pool().acquire("222").await.unwrap();
    let mut record = CallRecord::new(call_id, "111", "222", did.value, "/tmp/recordings");
    record.status = CallStatus::Forwarded;
    record.start_time = Utc::now() - Duration::minutes(minutes_ago);

    if persist {
        router.ledger().create(&record).await.unwrap();
    }
    router.index().put(record.clone()).await;
    record
}

#[tokio::test]
async fn test_stale_call_is_failed_and_did_reclaimed() {
    let (router, _temp_dir) = create_test_router(&["5550001"]).await;
    let record = seed_call(&router, "old-call", 10, true).await;

    let report = router.reaper().tick().await.unwrap();
    assert_eq!(
        report,
        ReapReport {
            expired: 1,
            evicted: 0,
            released: 1
        }
    );

    let stored = router.ledger().get("old-call").await.unwrap().unwrap();
    assert_eq!(stored.status, CallStatus::Failed);
    assert!(stored.end_time.is_some());
    assert!(stored.duration >= 600);

    let did = router.pool().get(&record.assigned_did).await.unwrap().unwrap();
    assert!(!did.in_use);
    assert!(did.destination.is_none());
    assert!(router.index().get_by_call_id("old-call").await.is_none());

    // The reclaimed DID is immediately allocatable again.
    let forward = router.handle_incoming("c2", "333", "444").await.unwrap();
    assert_eq!(forward.did_assigned, record.assigned_did);
}

#[tokio::test]
async fn test_fresh_calls_survive_a_tick() {
    let (router, _temp_dir) = create_test_router(&["5550001"]).await;
    let forward = router.handle_incoming("c1", "111", "222").await.unwrap();

    let report = router.reaper().tick().await.unwrap();
    assert_eq!(report, ReapReport::default());

    let stored = router.ledger().get("c1").await.unwrap().unwrap();
    assert_eq!(stored.status, CallStatus::Forwarded);
    assert!(router.pool().get(&forward.did_assigned).await.unwrap().unwrap().in_use);
    assert!(router.handle_return("222", &forward.did_assigned).await.is_ok());
}

#[tokio::test]
async fn test_returned_calls_expire_too() {
    let (router, _temp_dir) = create_test_router(&["5550001"]).await;
    let record = seed_call(&router, "old-call", 6, true).await;
    router
        .ledger()
        .update_status("old-call", CallStatus::Returned)
        .await
        .unwrap();

    let report = router.reaper().tick().await.unwrap();
    assert_eq!(report.expired, 1);
    assert!(!router.pool().get(&record.assigned_did).await.unwrap().unwrap().in_use);
}

#[tokio::test]
async fn test_memory_only_call_is_evicted() {
    let (router, _temp_dir) = create_test_router(&["5550001"]).await;
    let record = seed_call(&router, "lost-call", 10, false).await;

    let report = router.reaper().tick().await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(report.evicted, 1);
    assert_eq!(report.released, 1);

    assert!(router.index().get_by_did(&record.assigned_did).await.is_none());
    assert!(!router.pool().get(&record.assigned_did).await.unwrap().unwrap().in_use);
}

#[tokio::test]
async fn test_lagging_ledger_row_does_not_free_reassigned_did() {
    let (router, _temp_dir) = create_test_router(&["5550001"]).await;
    let record = seed_call(&router, "old-call", 10, true).await;

    // The call moved off its DID in memory but the ledger never heard.
    router.index().remove("old-call").await;
    router.pool().release(&record.assigned_did).await.unwrap();
    let forward = router.handle_incoming("c2", "333", "444").await.unwrap();
    assert_eq!(forward.did_assigned, record.assigned_did);

    let report = router.reaper().tick().await.unwrap();
    assert_eq!(
        report,
        ReapReport {
            expired: 1,
            evicted: 0,
            released: 0
        }
    );

    let did = router.pool().get(&record.assigned_did).await.unwrap().unwrap();
    assert!(did.in_use);
    assert_eq!(did.destination.as_deref(), Some("444"));

    let back = router.handle_return("444", &forward.did_assigned).await.unwrap();
    assert_eq!(back.ani_to_send, "333");
    assert_eq!(back.dnis_to_send, "444");
}

#[tokio::test]
async fn test_expired_call_is_not_resurrected() {
    let (router, _temp_dir) = create_test_router(&["5550001"]).await;
    let record = seed_call(&router, "old-call", 10, true).await;
    router.reaper().tick().await.unwrap();

    assert_eq!(router.restore().await.unwrap(), 0);
    let err = router
        .handle_return("222", &record.assigned_did)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_reaper_task_shuts_down() {
    let (router, _temp_dir) = create_test_router(&["5550001"]).await;
    let handle = router.start().await.unwrap();
    assert!(!handle.is_finished());

    tokio::time::timeout(std::time::Duration::from_secs(5), handle.shutdown())
        .await
        .expect("reaper did not stop");
}
