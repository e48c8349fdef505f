//! Analysis prompts with contact details masked out of message bodies

use regex::Regex;
use std::sync::LazyLock;

use crate::processors::analysis::{AiMessageRequest, Timeline};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("email pattern is valid")
});

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\d[\d\s().\-]{7,}\d").expect("phone pattern is valid")
});

/// Mask e-mail addresses and phone numbers
pub fn anonymize(text: &str) -> String {
    let masked = EMAIL.replace_all(text, "[email]");
    PHONE.replace_all(&masked, "[phone]").into_owned()
}

/// Builds the system and user prompts for one message
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_content_chars: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(12_000)
    }
}

impl PromptBuilder {
    pub fn new(max_content_chars: usize) -> Self {
        Self { max_content_chars }
    }

    pub fn system_prompt(&self) -> String {
        format!(
            "You are a business e-mail analyst. Your goal is to decide how important a message is \
             for the company and what should be done about it.\n\
             Answer with JSON only, no prose. Return one object with exactly these fields:\n\
             {{\"id\": string (copy from input), \"sender\": string (copy from input), \
             \"subject\": string (copy from input), \"html_analysis\": string (short HTML report), \
             \"classification\": {{\"category\": string, \"subcategory\": string, \
             \"confidence_score\": number 0..1}}, \
             \"sentiment\": {{\"tone\": string, \"urgency_score\": number 1..10, \
             \"business_potential\": number 1..10}}, \
             \"recommendation\": {{\"priority_level\": \"low\"|\"medium\"|\"high\", \
             \"reasoning\": string, \"response_template\": string}}, \
             \"action_steps\": [{{\"action\": string, \"timeline\": one of {}, \
             \"responsible\": string}}], \"summary\": string}}\n\
             Contact details in the body are masked as [email] and [phone]; do not guess them.",
            Timeline::ALL.join("|")
        )
    }

    pub fn user_prompt(&self, request: &AiMessageRequest) -> String {
        let mut content = anonymize(&request.content);
        if content.chars().count() > self.max_content_chars {
            content = content.chars().take(self.max_content_chars).collect();
            content.push_str("\n[truncated]");
        }

        let mut prompt = String::new();
        prompt.push_str(&format!("id: {}\n", request.id));
        prompt.push_str(&format!("sender: {}\n", request.sender));
        if let Some(name) = &request.sender_name {
            prompt.push_str(&format!("sender_name: {}\n", name));
        }
        prompt.push_str(&format!("subject: {}\n", request.subject));
        prompt.push_str(&format!("received: {}\n", request.timestamp.to_rfc3339()));
        prompt.push_str(&format!("unread: {}\n", request.is_unread));
        prompt.push_str(&format!("priority: {}\n", request.priority));
        if request.has_attachments {
            prompt.push_str(&format!("attachments: {}\n", request.attachment_count));
        }
        if !request.labels.is_empty() {
            prompt.push_str(&format!("labels: {}\n", request.labels.join(", ")));
        }
        prompt.push_str("\ncontent:\n");
        prompt.push_str(&content);
        prompt
    }
}
