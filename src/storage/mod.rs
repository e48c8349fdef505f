//! Message persistence boundary

pub mod json_file;
pub mod memory;
pub mod message;

pub use json_file::JsonFileMessageStore;
pub use memory::InMemoryMessageStore;
pub use message::{AiStatus, Message};

use async_trait::async_trait;

use crate::core::errors::Result;

/// Store of messages the AI pipeline reads from and writes analysis onto
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages awaiting analysis, newest first, at most `limit`.
    /// Includes failures that are worth retrying.
    async fn find_pending(&self, limit: usize) -> Result<Vec<Message>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>>;

    /// Insert or replace by id
    async fn save(&self, message: &Message) -> Result<()>;

    async fn count_by_status(&self, status: AiStatus) -> Result<usize>;
}

/// Shared selection rule for pending work
pub(crate) fn select_pending<'a>(messages: impl Iterator<Item = &'a Message>, limit: usize) -> Vec<Message> {
    let mut pending: Vec<Message> = messages
        .filter(|m| m.awaits_analysis())
        .cloned()
        .collect();
    pending.sort_by(|a, b| {
        b.message_timestamp
            .cmp(&a.message_timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });
    pending.truncate(limit);
    pending
}
