//! Sync engine: reconcile fetched graphs into a working copy, then commit
//!
//! A pass runs in waves. Each wave's queries finish before the next wave
//! is planned, since later waves depend on what earlier ones created.

mod cache;
mod context;
mod engine;
mod hook;
mod reconcile;

pub use cache::ParentCache;
pub use context::{RollbackSummary, SaveSummary, SyncContext};
pub use engine::{ServerReport, SyncEngine, SyncOutcome, SyncReport, latest_updates};
pub use hook::{LogHook, NoopHook, PostSyncHook};
pub use reconcile::{KindCounts, ReconcileReport, reconcile};
