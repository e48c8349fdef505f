//! Message ingestion and lock-guarded orchestration

pub mod orchestrator;
pub mod sync_service;

pub use orchestrator::{LockKey, LockStatus, RunOutcome, RunStatus, SyncOrchestrator};
pub use sync_service::{MessageSource, MessageSync, MessageSyncService, SpoolDirSource, SyncReport};
