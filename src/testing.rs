//! Hand-written fakes shared by the unit tests

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::core::adapter::{MeteredAdapter, ModelAdapter, ModelResponse};
use crate::core::cache::InMemoryCache;
use crate::core::clock::ManualClock;
use crate::core::errors::{AiError, Result};
use crate::core::models::{AdapterDescriptor, Provider};
use crate::core::router::CompletionRouter;
use crate::core::token_estimator::TokenEstimator;
use crate::core::transport::{Completion, CompletionRequest, CompletionTransport, ProviderEndpoint};
use crate::core::usage::UsageTracker;
use crate::storage::Message;
use crate::sync::{MessageSync, SyncReport};

#[derive(Debug, Clone)]
enum Scripted {
    Reply { content: String, tokens: Option<u64> },
    Fail { status: u16, body: String },
}

#[derive(Debug, Default)]
struct TransportScript {
    responses: HashMap<String, Scripted>,
    calls: Vec<String>,
}

/// Transport answering per model name; unknown models get a 404
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<TransportScript>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, model: &str, content: &str, tokens: Option<u64>) -> Self {
        self.script(
            model,
            Scripted::Reply {
                content: content.to_string(),
                tokens,
            },
        )
    }

    pub fn fail(self, model: &str, status: u16, body: &str) -> Self {
        self.script(
            model,
            Scripted::Fail {
                status,
                body: body.to_string(),
            },
        )
    }

    fn script(self, model: &str, response: Scripted) -> Self {
        self.inner.lock().unwrap().responses.insert(model.to_string(), response);
        self
    }

    /// Model names called, in order
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion> {
        let mut script = self.inner.lock().unwrap();
        script.calls.push(request.model.to_string());
        match script.responses.get(request.model) {
            Some(Scripted::Reply { content, tokens }) => Ok(Completion {
                content: content.clone(),
                tokens_used: *tokens,
            }),
            Some(Scripted::Fail { status, body }) => Err(AiError::ProviderError {
                model: request.model.to_string(),
                status: *status,
                body: body.clone(),
            }),
            None => Err(AiError::ProviderError {
                model: request.model.to_string(),
                status: 404,
                body: "model not scripted".to_string(),
            }),
        }
    }
}

/// Metered adapters sharing one manual clock and in-memory cache
pub struct FleetFixture {
    pub usage: UsageTracker,
    pub adapters: Vec<Arc<dyn ModelAdapter>>,
}

impl FleetFixture {
    fn descriptor(&self, name: &str) -> &AdapterDescriptor {
        self.adapters
            .iter()
            .find(|a| a.name() == name)
            .unwrap_or_else(|| panic!("no adapter named {name}"))
            .descriptor()
    }

    /// Spend an adapter's whole daily budget
    pub async fn exhaust(&self, name: &str) {
        let descriptor = self.descriptor(name);
        let limit = descriptor.daily_token_limit.unwrap_or(0);
        self.usage.track(descriptor, limit).await.unwrap();
    }

    pub async fn track(&self, name: &str, tokens: u64) {
        self.usage.track(self.descriptor(name), tokens).await.unwrap();
    }
}

/// Groq-flavoured adapters named after `models`, all keyed and scripted
pub fn fleet_fixture(models: &[(&str, Option<u64>)], transport: ScriptedTransport) -> FleetFixture {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
    let cache = Arc::new(InMemoryCache::new(clock.clone()));
    let usage = UsageTracker::new(cache, clock);
    let transport: Arc<dyn CompletionTransport> = Arc::new(transport);

    let adapters = models
        .iter()
        .map(|(name, limit)| {
            Arc::new(MeteredAdapter::new(
                AdapterDescriptor::new(*name, Provider::Groq, *limit, 512),
                ProviderEndpoint {
                    base_url: "http://scripted.invalid".to_string(),
                    api_key: Some("test".to_string()),
                },
                transport.clone(),
                usage.clone(),
                TokenEstimator::default(),
            )) as Arc<dyn ModelAdapter>
        })
        .collect();

    FleetFixture { usage, adapters }
}

#[derive(Debug, Default)]
struct RouterScript {
    replies: HashMap<String, Option<String>>,
    calls: Vec<String>,
}

/// Router answering per message id, read from the prompt's `id:` line
#[derive(Debug, Clone, Default)]
pub struct ScriptedRouter {
    inner: Arc<Mutex<RouterScript>>,
}

impl ScriptedRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, id: &str, content: String) -> Self {
        self.inner.lock().unwrap().replies.insert(id.to_string(), Some(content));
        self
    }

    pub fn exhausted(self, id: &str) -> Self {
        self.inner.lock().unwrap().replies.insert(id.to_string(), None);
        self
    }

    /// Message ids routed, in order
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl CompletionRouter for ScriptedRouter {
    async fn route(&self, _system: &str, user: &str) -> Result<ModelResponse> {
        let id = user
            .lines()
            .find_map(|line| line.strip_prefix("id: "))
            .unwrap_or_default()
            .to_string();
        let mut script = self.inner.lock().unwrap();
        script.calls.push(id.clone());
        match script.replies.get(&id) {
            Some(Some(content)) => Ok(ModelResponse {
                content: content.clone(),
                model: "scripted".to_string(),
                provider: Provider::Groq,
                tokens_used: 0,
            }),
            Some(None) => Err(AiError::AllProvidersExhausted {
                attempts: vec!["scripted: limit exceeded".to_string()],
            }),
            None => Err(AiError::InternalError(format!("no reply scripted for {id}"))),
        }
    }
}

/// Sync that parks until `release` is notified
#[derive(Debug, Default)]
pub struct BlockingSync {
    pub started: Notify,
    pub release: Notify,
    calls: AtomicUsize,
}

impl BlockingSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSync for BlockingSync {
    async fn sync(&self) -> Result<SyncReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(SyncReport {
            fetched: 1,
            stored: 1,
            ..Default::default()
        })
    }
}

/// Sync that errors or panics
#[derive(Debug)]
pub struct FailingSync {
    panics: bool,
}

impl FailingSync {
    pub fn error() -> Self {
        Self { panics: false }
    }

    pub fn panic() -> Self {
        Self { panics: true }
    }
}

#[async_trait]
impl MessageSync for FailingSync {
    async fn sync(&self) -> Result<SyncReport> {
        if self.panics {
            panic!("mailbox exploded");
        }
        Err(AiError::StoreError {
            message: "mailbox unavailable".to_string(),
        })
    }
}

/// A valid analysis record; priority high, first step this week
pub fn analysis_value(id: &str, confidence: f64) -> Value {
    json!({
        "id": id,
        "sender": "client@example.com",
        "subject": "Partnership proposal",
        "html_analysis": "<p>Promising inbound lead</p>",
        "classification": {
            "category": "business",
            "subcategory": "partnership",
            "confidence_score": confidence
        },
        "sentiment": {
            "tone": "positive",
            "urgency_score": 7,
            "business_potential": 8
        },
        "recommendation": {
            "priority_level": "high",
            "reasoning": "Concrete budget and timeline",
            "response_template": "Thanks for reaching out..."
        },
        "action_steps": [
            { "action": "Send pricing", "timeline": "ova_nedelja", "responsible": "sales" }
        ],
        "summary": "Client proposes a partnership."
    })
}

pub fn analysis_json(id: &str, confidence: f64) -> String {
    analysis_value(id, confidence).to_string()
}

pub fn pending_message(id: &str) -> Message {
    Message::new(
        id,
        "client@example.com",
        "Partnership proposal",
        "Hello, we would like to discuss a partnership. Call me at +1 555 010 2030.",
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
    )
}
