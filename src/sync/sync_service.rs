//! Fetch messages from a source and persist the new ones

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::errors::{AiError, Result};
use crate::storage::{AiStatus, Message, MessageStore};

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub stored: usize,
    pub skipped: usize,
    /// Non-fatal per-item problems
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Where new messages come from (mail provider, export, spool)
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch available messages; per-item problems go into the returned warnings
    async fn fetch(&self) -> Result<(Vec<Message>, Vec<String>)>;
}

/// Reads one JSON message per `*.json` file in a directory
#[derive(Debug, Clone)]
pub struct SpoolDirSource {
    dir: PathBuf,
}

impl SpoolDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MessageSource for SpoolDirSource {
    async fn fetch(&self) -> Result<(Vec<Message>, Vec<String>)> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Spool directory {} does not exist", self.dir.display());
                return Ok((Vec::new(), Vec::new()));
            }
            Err(e) => {
                return Err(AiError::StoreError {
                    message: format!("{}: {}", self.dir.display(), e),
                })
            }
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut messages = Vec::with_capacity(paths.len());
        let mut warnings = Vec::new();
        for path in paths {
            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Message>(&content) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    warn!("Skipping unreadable message file {}: {}", path.display(), e);
                    warnings.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        Ok((messages, warnings))
    }
}

/// A sync operation the orchestrator can guard
#[async_trait]
pub trait MessageSync: Send + Sync {
    async fn sync(&self) -> Result<SyncReport>;
}

/// Persists fetched messages that are not stored yet
pub struct MessageSyncService {
    source: Arc<dyn MessageSource>,
    store: Arc<dyn MessageStore>,
}

impl MessageSyncService {
    pub fn new(source: Arc<dyn MessageSource>, store: Arc<dyn MessageStore>) -> Self {
        Self { source, store }
    }
}

#[async_trait]
impl MessageSync for MessageSyncService {
    async fn sync(&self) -> Result<SyncReport> {
        let (messages, errors) = self.source.fetch().await?;
        let mut report = SyncReport {
            fetched: messages.len(),
            errors,
            ..Default::default()
        };

        for mut message in messages {
            if self.store.find_by_id(&message.id).await?.is_some() {
                report.skipped += 1;
                continue;
            }
            // Incoming messages always start the AI pipeline from scratch
            message.ai_status = AiStatus::Pending;
            message.ai_analysis = None;
            message.ai_processed_at = None;
            message.ai_error = None;
            message.ai_raw_response = None;
            message.ai_retryable = false;
            self.store.save(&message).await?;
            report.stored += 1;
        }

        info!(
            "Sync fetched {} messages: {} stored, {} already present",
            report.fetched, report.stored, report.skipped
        );
        Ok(report)
    }
}
