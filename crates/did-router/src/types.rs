//! Core types for the DID router

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RouterError;

/// Lifecycle state of a call moving through the forwarding pipeline.
///
/// ```text
/// ACTIVE -> FORWARDED -> RETURNED -> COMPLETED
///    \          \           \
///     +----------+-----------+----> FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Active,
    Forwarded,
    Returned,
    Completed,
    Failed,
}

impl CallStatus {
    /// States that still hold a DID and may be looked up.
    pub const NON_TERMINAL: [CallStatus; 3] =
        [CallStatus::Active, CallStatus::Forwarded, CallStatus::Returned];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Active => "ACTIVE",
            CallStatus::Forwarded => "FORWARDED",
            CallStatus::Returned => "RETURNED",
            CallStatus::Completed => "COMPLETED",
            CallStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        use CallStatus::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Active, Forwarded) => true,
            (Forwarded, Returned) => true,
            // The reconciler may resurrect an ACTIVE row whose FORWARDED
            // update never reached the store.
            (Active, Returned) => true,
            (Active | Forwarded | Returned, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(CallStatus::Active),
            "FORWARDED" => Ok(CallStatus::Forwarded),
            "RETURNED" => Ok(CallStatus::Returned),
            "COMPLETED" => Ok(CallStatus::Completed),
            "FAILED" => Ok(CallStatus::Failed),
            other => Err(RouterError::InvalidStatus(other.to_string())),
        }
    }
}

/// One call's journey through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub original_ani: String,
    pub original_dnis: String,
    pub assigned_did: String,
    pub status: CallStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds between start and the terminal transition.
    pub duration: i64,
    pub recording_path: String,
}

impl CallRecord {
    /// Build a fresh `ACTIVE` record bound to `did`.
    pub fn new(
        call_id: impl Into<String>,
        ani: impl Into<String>,
        dnis: impl Into<String>,
        did: impl Into<String>,
        recording_dir: &str,
    ) -> Self {
        let call_id = call_id.into();
        let recording_path = recording_path_for(recording_dir, &call_id);
        Self {
            call_id,
            original_ani: ani.into(),
            original_dnis: dnis.into(),
            assigned_did: did.into(),
            status: CallStatus::Active,
            start_time: Utc::now(),
            end_time: None,
            duration: 0,
            recording_path,
        }
    }

    /// Whether the record started longer than `max_age` ago.
    pub fn is_older_than(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        now.checked_sub_signed(max_age)
            .is_some_and(|cutoff| self.start_time < cutoff)
    }
}

/// Recording location derived from the call id.
pub fn recording_path_for(recording_dir: &str, call_id: &str) -> String {
    format!("{}/{}.wav", recording_dir.trim_end_matches('/'), call_id)
}

/// A poolable phone number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Did {
    pub value: String,
    pub in_use: bool,
    pub destination: Option<String>,
    pub country: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Routing instruction returned for the first hop (incoming call).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingResponse {
    pub status: String,
    pub did_assigned: String,
    pub next_hop: String,
    pub ani_to_send: String,
    pub dnis_to_send: String,
}

/// Routing instruction returned for the final hop (returning call).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnResponse {
    pub status: String,
    pub next_hop: String,
    pub ani_to_send: String,
    pub dnis_to_send: String,
}

/// DID inventory counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUsage {
    pub total: i64,
    pub in_use: i64,
    pub available: i64,
}

impl PoolUsage {
    /// Fraction of the pool currently bound to calls, 0.0 for an empty pool.
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.in_use as f64 / self.total as f64
        }
    }
}

/// Summary of a call held in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveCallSummary {
    pub call_id: String,
    pub did: String,
    pub status: CallStatus,
    pub start_time: DateTime<Utc>,
}

impl From<&CallRecord> for ActiveCallSummary {
    fn from(record: &CallRecord) -> Self {
        Self {
            call_id: record.call_id.clone(),
            did: record.assigned_did.clone(),
            status: record.status,
            start_time: record.start_time,
        }
    }
}

/// Router statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStats {
    pub active_calls: usize,
    pub total_dids: i64,
    pub used_dids: i64,
    pub available_dids: i64,
    pub pool_utilization: f64,
    pub calls_today: i64,
    pub completed_today: i64,
    pub timestamp: DateTime<Utc>,
    pub memory_calls: Vec<ActiveCallSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            CallStatus::Active,
            CallStatus::Forwarded,
            CallStatus::Returned,
            CallStatus::Completed,
            CallStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CallStatus>().unwrap(), status);
        }
        assert!(matches!(
            "FORWARDED_TO_S3".parse::<CallStatus>(),
            Err(RouterError::InvalidStatus(_))
        ));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for next in CallStatus::NON_TERMINAL {
            assert!(!CallStatus::Completed.can_transition_to(next));
            assert!(!CallStatus::Failed.can_transition_to(next));
        }
        assert!(!CallStatus::Failed.can_transition_to(CallStatus::Completed));
    }

    #[test]
    fn test_forward_path_and_failure_edges() {
        assert!(CallStatus::Active.can_transition_to(CallStatus::Forwarded));
        assert!(CallStatus::Forwarded.can_transition_to(CallStatus::Returned));
        assert!(CallStatus::Returned.can_transition_to(CallStatus::Completed));
        for status in CallStatus::NON_TERMINAL {
            assert!(status.can_transition_to(CallStatus::Failed));
        }
        assert!(!CallStatus::Returned.can_transition_to(CallStatus::Forwarded));
    }

    #[test]
    fn test_recording_path_is_derived_from_call_id() {
        let record = CallRecord::new("c1", "111", "222", "5550001", "/var/rec/");
        assert_eq!(record.recording_path, "/var/rec/c1.wav");
        assert_eq!(record.status, CallStatus::Active);
    }

    #[test]
    fn test_pool_utilization() {
        assert_eq!(PoolUsage::default().utilization(), 0.0);
        let usage = PoolUsage { total: 4, in_use: 1, available: 3 };
        assert!((usage.utilization() - 0.25).abs() < f64::EPSILON);
    }
}
