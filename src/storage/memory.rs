//! In-process message store

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{select_pending, AiStatus, Message, MessageStore};
use crate::core::errors::Result;

#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<HashMap<String, Message>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: RwLock::new(messages.into_iter().map(|m| (m.id.clone(), m)).collect()),
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn find_pending(&self, limit: usize) -> Result<Vec<Message>> {
        let messages = self.messages.read().await;
        Ok(select_pending(messages.values(), limit))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>> {
        Ok(self.messages.read().await.get(id).cloned())
    }

    async fn save(&self, message: &Message) -> Result<()> {
        self.messages
            .write()
            .await
            .insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn count_by_status(&self, status: AiStatus) -> Result<usize> {
        let messages = self.messages.read().await;
        Ok(messages.values().filter(|m| m.ai_status == status).count())
    }
}
