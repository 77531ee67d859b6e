//! # DID Router
//!
//! Call correlation engine for a multi-stage call-forwarding pipeline.
//!
//! An incoming call is given a DID from a shared pool and forwarded with its
//! identity swapped (`ANI = DNIS`, `DNIS = DID`). When the call comes back,
//! identified only by that DID, the router recovers the original ANI/DNIS
//! pair for the final hop.
//!
//! This crate provides:
//! - An atomic DID pool backed by SQLite
//! - A durable call ledger with upsert semantics
//! - A locked in-memory index of live calls, rebuilt from the ledger on startup
//! - A reaper that fails abandoned calls and reclaims their DIDs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rvoip_did_router::{CallRouter, RouterConfig};
//!
//! # async fn example() -> rvoip_did_router::Result<()> {
//! let router = CallRouter::connect(RouterConfig::default()).await?;
//! let reaper = router.start().await?;
//!
//! let forward = router.handle_incoming("call-1", "111", "222").await?;
//! let back = router.handle_return("222", &forward.did_assigned).await?;
//! assert_eq!((back.ani_to_send.as_str(), back.dnis_to_send.as_str()), ("111", "222"));
//!
//! reaper.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod index;
pub mod ledger;
pub mod logging;
pub mod pool;
pub mod reaper;
pub mod reconciler;
pub mod types;

pub use config::RouterConfig;
pub use database::Database;
pub use engine::CallRouter;
pub use error::{Result, RouterError};
pub use index::CallIndex;
pub use ledger::CallLedger;
pub use pool::DidPool;
pub use reaper::{ReapReport, Reaper, ReaperHandle};
pub use reconciler::Reconciler;
pub use types::{CallRecord, CallStatus, Did, IncomingResponse, ReturnResponse, RouterStats};
