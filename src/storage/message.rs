//! Message entity as seen by the AI pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::core::errors::AiError;
use crate::processors::analysis::AiMessageResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for AiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AiStatus::Pending => "pending",
            AiStatus::Processing => "processing",
            AiStatus::Completed => "completed",
            AiStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// An ingested message plus its AI fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub sender: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content_text: String,
    pub message_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachment_count: u32,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub is_unread: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub ai_status: AiStatus,
    #[serde(default)]
    pub ai_analysis: Option<AiMessageResponse>,
    #[serde(default)]
    pub ai_processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ai_error: Option<String>,
    /// Model output kept for inspection when analysis failed
    #[serde(default)]
    pub ai_raw_response: Option<String>,
    /// Failed for a transient reason; picked up again by the next batch
    #[serde(default)]
    pub ai_retryable: bool,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        content_text: impl Into<String>,
        message_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
            sender: sender.into(),
            sender_name: None,
            subject: subject.into(),
            content_text: content_text.into(),
            message_timestamp,
            attachment_count: 0,
            labels: Vec::new(),
            is_unread: true,
            metadata: Map::new(),
            ai_status: AiStatus::Pending,
            ai_analysis: None,
            ai_processed_at: None,
            ai_error: None,
            ai_raw_response: None,
            ai_retryable: false,
        }
    }

    /// Web link to the message in Gmail, when its Gmail id is known
    pub fn gmail_link(&self) -> Option<String> {
        self.metadata
            .get("gmail_id")
            .and_then(Value::as_str)
            .or(self.thread_id.as_deref())
            .map(|id| format!("https://mail.google.com/mail/u/0/#inbox/{}", id))
    }

    /// Pending, or failed in a way worth another attempt
    pub fn awaits_analysis(&self) -> bool {
        match self.ai_status {
            AiStatus::Pending => true,
            AiStatus::Failed => self.ai_retryable,
            AiStatus::Processing | AiStatus::Completed => false,
        }
    }

    pub fn mark_processing(&mut self) {
        self.ai_status = AiStatus::Processing;
        self.ai_error = None;
        self.ai_retryable = false;
    }

    pub fn mark_completed(&mut self, analysis: AiMessageResponse, at: DateTime<Utc>) {
        self.ai_status = AiStatus::Completed;
        self.ai_analysis = Some(analysis);
        self.ai_processed_at = Some(at);
        self.ai_error = None;
        self.ai_raw_response = None;
        self.ai_retryable = false;
    }

    /// Record a failed analysis, keeping any raw model output
    pub fn mark_failed(&mut self, error: &AiError, at: DateTime<Utc>) {
        self.ai_status = AiStatus::Failed;
        self.ai_processed_at = Some(at);
        self.ai_error = Some(error.to_string());
        self.ai_raw_response = error.raw_response().map(str::to_string);
        self.ai_retryable = error.is_retryable();
    }
}
