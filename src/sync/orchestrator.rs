//! Lock-guarded entry points for mail sync and AI processing
//!
//! Each batch operation holds a TTL lock in the shared [`CacheStore`] while it
//! runs. A second caller is rejected with `already_running` instead of being
//! queued. The lock is released on every exit path, including panics, and a
//! crashed holder is bounded by the lock TTL.

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::cache::CacheStore;
use crate::core::clock::Clock;
use crate::core::errors::{AiError, Result};
use crate::processors::message_processor::{AiMessageProcessor, BatchReport, ProcessOutcome};
use crate::sync::sync_service::{MessageSync, SyncReport};

/// Which batch operation a lock protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKey {
    Messages,
    Ai,
}

impl LockKey {
    pub const ALL: [LockKey; 2] = [LockKey::Messages, LockKey::Ai];

    pub fn as_str(&self) -> &'static str {
        match self {
            LockKey::Messages => "messages",
            LockKey::Ai => "ai",
        }
    }

    fn cache_key(&self) -> String {
        format!("sync_lock:{}", self.as_str())
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockKey {
    type Err = AiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "messages" | "mail" => Ok(LockKey::Messages),
            "ai" => Ok(LockKey::Ai),
            other => Err(AiError::validation(format!(
                "unknown lock key '{}', expected messages or ai",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    AlreadyRunning,
}

/// Result of a guarded run; the operation's own report is flattened in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome<T> {
    pub success: bool,
    pub status: RunStatus,
    #[serde(flatten)]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> RunOutcome<T> {
    fn completed(result: T) -> Self {
        Self {
            success: true,
            status: RunStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            status: RunStatus::Failed,
            result: None,
            error: Some(error),
        }
    }

    fn already_running() -> Self {
        Self {
            success: false,
            status: RunStatus::AlreadyRunning,
            result: None,
            error: None,
        }
    }

    pub fn is_already_running(&self) -> bool {
        self.status == RunStatus::AlreadyRunning
    }
}

/// Read-only view of one lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockStatus {
    pub key: LockKey,
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_for_seconds: Option<i64>,
}

/// Serializes sync and AI batch runs through TTL locks
pub struct SyncOrchestrator {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    sync: Arc<dyn MessageSync>,
    processor: Arc<AiMessageProcessor>,
    lock_ttl: Duration,
    last_token: AtomicI64,
}

/// Lock tokens are epoch millis scaled by this, leaving room for a sequence
const TOKENS_PER_MILLI: i64 = 1000;

impl SyncOrchestrator {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        sync: Arc<dyn MessageSync>,
        processor: Arc<AiMessageProcessor>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            clock,
            sync,
            processor,
            lock_ttl,
            last_token: AtomicI64::new(0),
        }
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    pub async fn is_sync_in_progress(&self, key: LockKey) -> Result<bool> {
        self.cache.has(&key.cache_key()).await
    }

    pub async fn sync_messages_only(&self) -> RunOutcome<SyncReport> {
        self.guarded(LockKey::Messages, || self.sync.sync()).await
    }

    /// Analyze up to `limit` pending messages, newest first
    pub async fn process_ai_only(&self, limit: usize) -> RunOutcome<BatchReport> {
        self.guarded(LockKey::Ai, || async move {
            let pending = self.processor.store().find_pending(limit).await?;
            info!("Found {} pending messages for AI processing", pending.len());
            Ok::<_, AiError>(self.processor.process_batch(pending).await)
        })
        .await
    }

    /// Analyze one message directly; not lock-guarded
    pub async fn process_single_message_by_id(&self, id: &str, force_reprocess: bool) -> Result<ProcessOutcome> {
        let message = self
            .processor
            .store()
            .find_by_id(id)
            .await?
            .ok_or_else(|| AiError::NotFound {
                what: format!("message {}", id),
            })?;
        Ok(self.processor.process_single_message(message, force_reprocess).await)
    }

    /// Clear a lock for operator recovery. In-flight work keeps running.
    pub async fn force_release_lock(&self, key: LockKey) -> Result<bool> {
        let released = self.cache.forget(&key.cache_key()).await?;
        if released {
            warn!("Lock {} was force-released", key);
        } else {
            info!("Lock {} was not held", key);
        }
        Ok(released)
    }

    pub async fn get_sync_status(&self, key: LockKey) -> Result<LockStatus> {
        let locked_at = self
            .cache
            .get(&key.cache_key())
            .await?
            .and_then(|token| Utc.timestamp_millis_opt(token / TOKENS_PER_MILLI).single());
        let locked_for_seconds = locked_at.map(|at| (self.clock.now() - at).num_seconds().max(0));

        Ok(LockStatus {
            key,
            is_locked: locked_at.is_some(),
            locked_at,
            locked_for_seconds,
        })
    }

    /// Strictly increasing, so two holders never share a token
    fn next_token(&self) -> i64 {
        let now = self.clock.now().timestamp_millis() * TOKENS_PER_MILLI;
        let previous = self
            .last_token
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        now.max(previous + 1)
    }

    /// Take the lock; returns the token the holder must present on release
    async fn acquire(&self, key: LockKey) -> Result<Option<i64>> {
        let token = self.next_token();
        let acquired = self.cache.add(&key.cache_key(), token, Some(self.lock_ttl)).await?;
        Ok(acquired.then_some(token))
    }

    async fn release(&self, key: LockKey, token: i64) {
        match self.cache.forget_if(&key.cache_key(), token).await {
            Ok(true) => info!("Released {} lock", key),
            Ok(false) => warn!("Lock {} was released or replaced while running", key),
            Err(e) => error!("Failed to release {} lock: {}", key, e),
        }
    }

    async fn guarded<T, F, Fut>(&self, key: LockKey, operation: F) -> RunOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = match self.acquire(key).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!("{} run already in progress, rejecting", key);
                return RunOutcome::already_running();
            }
            Err(e) => {
                error!("Could not acquire {} lock: {}", key, e);
                return RunOutcome::failed(e.to_string());
            }
        };
        info!("Acquired {} lock", key);

        let result = AssertUnwindSafe(operation()).catch_unwind().await;
        self.release(key, token).await;

        match result {
            Ok(Ok(value)) => RunOutcome::completed(value),
            Ok(Err(e)) => {
                error!("{} run failed: {}", key, e);
                RunOutcome::failed(e.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic);
                error!("{} run panicked: {}", key, reason);
                RunOutcome::failed(reason)
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("operation panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("operation panicked: {}", s)
    } else {
        "operation panicked".to_string()
    }
}
