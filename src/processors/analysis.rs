//! Prompt input and validated analysis output for a single message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::{AiError, Result};
use crate::storage::Message;

/// Normalized view of a message used to build the prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMessageRequest {
    pub id: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub has_attachments: bool,
    pub attachment_count: u32,
    pub labels: Vec<String>,
    pub is_unread: bool,
    pub priority: String,
}

impl AiMessageRequest {
    pub fn from_message(message: &Message) -> Self {
        let priority = message
            .metadata
            .get("priority")
            .and_then(Value::as_str)
            .unwrap_or("normal")
            .to_string();

        Self {
            id: message.id.clone(),
            sender: message.sender.clone(),
            sender_name: message.sender_name.clone(),
            subject: message.subject.clone(),
            content: message.content_text.clone(),
            timestamp: message.message_timestamp,
            has_attachments: message.attachment_count > 0,
            attachment_count: message.attachment_count,
            labels: message.labels.clone(),
            is_unread: message.is_unread,
            priority,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
}

/// When an action step should happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeline {
    /// Urgent
    Hitno,
    /// This week
    OvaNedelja,
    /// This month
    OvajMesec,
    /// Long term
    Dugorocno,
    /// No deadline
    NemaDeadline,
}

impl Timeline {
    pub const ALL: [&'static str; 5] = ["hitno", "ova_nedelja", "ovaj_mesec", "dugorocno", "nema_deadline"];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    #[serde(default)]
    pub tone: String,
    pub urgency_score: f64,
    pub business_potential: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority_level: PriorityLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub action: String,
    pub timeline: Timeline,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible: Option<String>,
}

/// Canonical, validated analysis of one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMessageResponse {
    pub id: String,
    pub sender: String,
    pub subject: String,
    #[serde(default)]
    pub html_analysis: String,
    pub classification: Classification,
    pub sentiment: Sentiment,
    pub recommendation: Recommendation,
    #[serde(default)]
    pub action_steps: Vec<ActionStep>,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gmail_link: Option<String>,
}

impl AiMessageResponse {
    /// Parse and validate one normalized record. Out-of-range or missing
    /// values reject the record; nothing is clamped.
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut value = value.clone();
        let record = value
            .as_object_mut()
            .ok_or_else(|| AiError::validation("analysis record must be a JSON object"))?;

        // Models often emit numeric ids
        if let Some(id) = record.get("id").filter(|v| v.is_number()).map(|v| v.to_string()) {
            record.insert("id".to_string(), Value::String(id));
        }

        let response: Self = serde_json::from_value(value)
            .map_err(|e| AiError::validation(format!("malformed analysis: {}", e)))?;
        response.validate()?;
        Ok(response)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("id", &self.id), ("sender", &self.sender), ("subject", &self.subject)] {
            if value.trim().is_empty() {
                return Err(AiError::validation(format!("{} must not be empty", field)));
            }
        }

        check_range(
            "classification.confidence_score",
            self.classification.confidence_score,
            0.0,
            1.0,
        )?;
        check_range("sentiment.urgency_score", self.sentiment.urgency_score, 1.0, 10.0)?;
        check_range(
            "sentiment.business_potential",
            self.sentiment.business_potential,
            1.0,
            10.0,
        )?;

        for (i, step) in self.action_steps.iter().enumerate() {
            if step.action.trim().is_empty() {
                return Err(AiError::validation(format!("action_steps[{}].action must not be empty", i)));
            }
        }

        Ok(())
    }
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(AiError::validation(format!(
            "{} must be within [{}, {}], got {}",
            field, min, max, value
        )));
    }
    Ok(())
}
