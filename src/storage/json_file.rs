//! Message store persisted as a single JSON document

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::{select_pending, AiStatus, Message, MessageStore};
use crate::core::errors::{AiError, Result};

/// Loads the whole file per operation; suited to CLI-sized inboxes
#[derive(Debug)]
pub struct JsonFileMessageStore {
    path: PathBuf,
    io: Mutex<()>,
}

impl JsonFileMessageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, Message>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => {
                let messages: Vec<Message> = serde_json::from_str(&content)?;
                Ok(messages.into_iter().map(|m| (m.id.clone(), m)).collect())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(AiError::StoreError {
                message: format!("{}: {}", self.path.display(), e),
            }),
        }
    }

    async fn persist(&self, messages: &BTreeMap<String, Message>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let list: Vec<&Message> = messages.values().collect();
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&list)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Persisted {} messages to {}", list.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl MessageStore for JsonFileMessageStore {
    async fn find_pending(&self, limit: usize) -> Result<Vec<Message>> {
        let _guard = self.io.lock().await;
        let messages = self.load().await?;
        Ok(select_pending(messages.values(), limit))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>> {
        let _guard = self.io.lock().await;
        Ok(self.load().await?.remove(id))
    }

    async fn save(&self, message: &Message) -> Result<()> {
        let _guard = self.io.lock().await;
        let mut messages = self.load().await?;
        messages.insert(message.id.clone(), message.clone());
        self.persist(&messages).await
    }

    async fn count_by_status(&self, status: AiStatus) -> Result<usize> {
        let _guard = self.io.lock().await;
        let messages = self.load().await?;
        Ok(messages.values().filter(|m| m.ai_status == status).count())
    }
}
