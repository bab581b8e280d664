//! Recurring tasks: which instances are due, which tasks are retained, and the
//! orchestrator that keeps today's instances materialized.

pub mod engine;
pub mod retention;
pub mod sync;

pub use engine::compute_missing_instances;
pub use retention::{count_expired, retain_current};
pub use sync::{SyncHandle, SyncOrchestrator, SyncReport, SyncTrigger, spawn_sync_loop};
