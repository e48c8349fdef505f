//! Analyze messages through the router and persist the outcome

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::clock::{Clock, SystemClock};
use crate::core::errors::{AiError, Result};
use crate::core::router::CompletionRouter;
use crate::processors::analysis::{AiMessageRequest, AiMessageResponse};
use crate::processors::normalizer::normalize;
use crate::processors::prompt::PromptBuilder;
use crate::storage::{AiStatus, Message, MessageStore};

/// Result of analyzing one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub message_id: String,
    pub success: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessOutcome {
    fn skipped(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            success: true,
            skipped: true,
            model: None,
            error: None,
        }
    }

    fn completed(message_id: &str, model: String) -> Self {
        Self {
            message_id: message_id.to_string(),
            success: true,
            skipped: false,
            model: Some(model),
            error: None,
        }
    }

    fn failed(message_id: &str, error: String) -> Self {
        Self {
            message_id: message_id.to_string(),
            success: false,
            skipped: false,
            model: None,
            error: Some(error),
        }
    }
}

/// Aggregate of a batch run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Failure reason per message id
    pub errors: BTreeMap<String, String>,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = ProcessOutcome>) -> Self {
        let mut report = BatchReport::default();
        for outcome in outcomes {
            report.total += 1;
            match (outcome.success, outcome.skipped) {
                (true, true) => report.skipped += 1,
                (true, false) => report.processed += 1,
                (false, _) => {
                    report.failed += 1;
                    report.errors.insert(
                        outcome.message_id,
                        outcome.error.unwrap_or_else(|| "unknown error".to_string()),
                    );
                }
            }
        }
        report
    }
}

/// Prompt, route, normalize, validate, persist
pub struct AiMessageProcessor {
    router: Arc<dyn CompletionRouter>,
    store: Arc<dyn MessageStore>,
    prompts: PromptBuilder,
    clock: Arc<dyn Clock>,
    max_concurrent: usize,
}

impl AiMessageProcessor {
    pub fn new(router: Arc<dyn CompletionRouter>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            router,
            store,
            prompts: PromptBuilder::default(),
            clock: Arc::new(SystemClock),
            max_concurrent: 5,
        }
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Analyze one message. The message always ends either `completed` with
    /// an analysis or `failed` with an error; this never returns `Err`.
    pub async fn process_single_message(&self, mut message: Message, force_reprocess: bool) -> ProcessOutcome {
        if message.ai_status == AiStatus::Completed && !force_reprocess {
            debug!("Message {} already analyzed, skipping", message.id);
            return ProcessOutcome::skipped(&message.id);
        }

        message.mark_processing();
        if let Err(e) = self.store.save(&message).await {
            error!("Could not mark message {} as processing: {}", message.id, e);
            return ProcessOutcome::failed(&message.id, e.to_string());
        }

        match self.analyze(&message).await {
            Ok((analysis, model)) => {
                message.mark_completed(analysis, self.clock.now());
                if let Err(e) = self.store.save(&message).await {
                    error!("Could not persist analysis for {}: {}", message.id, e);
                    message.ai_analysis = None;
                    message.mark_failed(&e, self.clock.now());
                    // the model answered; only the write was lost
                    message.ai_retryable = true;
                    self.save_failure(&message).await;
                    return ProcessOutcome::failed(&message.id, e.to_string());
                }
                info!("Message {} analyzed by {}", message.id, model);
                ProcessOutcome::completed(&message.id, model)
            }
            Err(e) => {
                warn!("Analysis failed for message {}: {}", message.id, e);
                message.mark_failed(&e, self.clock.now());
                self.save_failure(&message).await;
                ProcessOutcome::failed(&message.id, e.to_string())
            }
        }
    }

    async fn save_failure(&self, message: &Message) {
        if let Err(e) = self.store.save(message).await {
            error!("Could not record failure for {}: {}", message.id, e);
        }
    }

    /// Analyze messages in the given order with bounded concurrency.
    /// One message failing never affects the others.
    pub async fn process_batch(&self, messages: Vec<Message>) -> BatchReport {
        let count = messages.len();
        let outcomes: Vec<ProcessOutcome> = stream::iter(messages)
            .map(|message| self.process_single_message(message, false))
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let report = BatchReport::from_outcomes(outcomes);
        info!(
            "Batch of {} done: {} processed, {} skipped, {} failed",
            count, report.processed, report.skipped, report.failed
        );
        report
    }

    async fn analyze(&self, message: &Message) -> Result<(AiMessageResponse, String)> {
        let request = AiMessageRequest::from_message(message);
        let system = self.prompts.system_prompt();
        let user = self.prompts.user_prompt(&request);

        let response = self.router.route(&system, &user).await?;
        let records = normalize(&response.content)?;

        let record = select_record(&records, &message.id).ok_or_else(|| AiError::ValidationError {
            message: "model output contained no analysis record".to_string(),
            raw: Some(response.content.clone()),
        })?;

        let mut analysis = AiMessageResponse::from_value(record).map_err(|e| match e {
            AiError::ValidationError { message, .. } => AiError::ValidationError {
                message,
                raw: Some(response.content.clone()),
            },
            other => other,
        })?;

        if analysis.gmail_link.is_none() {
            analysis.gmail_link = message.gmail_link();
        }

        Ok((analysis, response.model))
    }
}

/// The record whose id matches the message, else the first one
fn select_record<'a>(records: &'a [Value], message_id: &str) -> Option<&'a Value> {
    records
        .iter()
        .find(|r| match &r["id"] {
            Value::String(id) => id == message_id,
            Value::Number(n) => n.to_string() == message_id,
            _ => false,
        })
        .or_else(|| records.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adapter::ModelResponse;
    use crate::core::models::Provider;
    use crate::storage::InMemoryMessageStore;
    use crate::testing::{analysis_json, pending_message, ScriptedRouter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn processor(router: ScriptedRouter, messages: Vec<Message>) -> (Arc<InMemoryMessageStore>, AiMessageProcessor) {
        let store = Arc::new(InMemoryMessageStore::with_messages(messages));
        let processor = AiMessageProcessor::new(Arc::new(router), store.clone()).with_max_concurrent(3);
        (store, processor)
    }

    #[tokio::test]
    async fn successful_analysis_completes_message() {
        let router = ScriptedRouter::new().reply("m1", analysis_json("m1", 0.8));
        let (store, processor) = processor(router, vec![pending_message("m1")]);

        let message = store.find_by_id("m1").await.unwrap().unwrap();
        let outcome = processor.process_single_message(message, false).await;
        assert!(outcome.success, "{:?}", outcome.error);

        let saved = store.find_by_id("m1").await.unwrap().unwrap();
        assert_eq!(saved.ai_status, AiStatus::Completed);
        let analysis = saved.ai_analysis.unwrap();
        assert_eq!(analysis.classification.confidence_score, 0.8);
        assert!(saved.ai_processed_at.is_some());
        assert!(saved.ai_error.is_none());
    }

    #[tokio::test]
    async fn exhaustion_marks_message_failed() {
        let router = ScriptedRouter::new().exhausted("m1");
        let (store, processor) = processor(router, vec![pending_message("m1")]);

        let message = store.find_by_id("m1").await.unwrap().unwrap();
        let outcome = processor.process_single_message(message, false).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("exhausted"));

        let saved = store.find_by_id("m1").await.unwrap().unwrap();
        assert_eq!(saved.ai_status, AiStatus::Failed);
        assert!(saved.ai_analysis.is_none());
    }

    #[tokio::test]
    async fn invalid_output_keeps_raw_response() {
        let bad = analysis_json("m1", 1.5);
        let router = ScriptedRouter::new()
            .reply("m1", bad.clone())
            .reply("m2", "I cannot help with that".to_string());
        let (store, processor) = processor(router, vec![pending_message("m1"), pending_message("m2")]);

        let outcome = processor
            .process_single_message(store.find_by_id("m1").await.unwrap().unwrap(), false)
            .await;
        assert!(outcome.error.unwrap().contains("confidence_score"));
        let saved = store.find_by_id("m1").await.unwrap().unwrap();
        assert_eq!(saved.ai_status, AiStatus::Failed);
        assert_eq!(saved.ai_raw_response.as_deref(), Some(bad.as_str()));

        processor
            .process_single_message(store.find_by_id("m2").await.unwrap().unwrap(), false)
            .await;
        let saved = store.find_by_id("m2").await.unwrap().unwrap();
        assert_eq!(saved.ai_raw_response.as_deref(), Some("I cannot help with that"));
    }

    #[tokio::test]
    async fn completed_messages_are_skipped_unless_forced() {
        let router = ScriptedRouter::new().reply("m1", analysis_json("m1", 0.3));
        let (store, processor) = processor(router.clone(), vec![pending_message("m1")]);
        let message = store.find_by_id("m1").await.unwrap().unwrap();
        processor.process_single_message(message, false).await;

        let done = store.find_by_id("m1").await.unwrap().unwrap();
        let outcome = processor.process_single_message(done.clone(), false).await;
        assert!(outcome.skipped);
        assert_eq!(router.calls().len(), 1);

        let outcome = processor.process_single_message(done, true).await;
        assert!(outcome.success && !outcome.skipped);
        assert_eq!(router.calls().len(), 2);
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let router = ScriptedRouter::new()
            .reply("a", analysis_json("a", 0.9))
            .exhausted("b")
            .reply("c", analysis_json("c", 0.1));
        let messages = vec![pending_message("a"), pending_message("b"), pending_message("c")];
        let (store, processor) = processor(router, messages.clone());

        let report = processor.process_batch(messages).await;
        assert_eq!(report.total, 3);
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert!(report.errors["b"].contains("exhausted"));
        assert_eq!(store.count_by_status(AiStatus::Completed).await.unwrap(), 2);
        assert_eq!(store.count_by_status(AiStatus::Failed).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausted_messages_are_retried_by_next_batch() {
        let store = Arc::new(InMemoryMessageStore::with_messages(vec![pending_message("m1")]));
        let exhausted = AiMessageProcessor::new(Arc::new(ScriptedRouter::new().exhausted("m1")), store.clone());
        let report = exhausted.process_batch(store.find_pending(10).await.unwrap()).await;
        assert_eq!(report.failed, 1);

        let saved = store.find_by_id("m1").await.unwrap().unwrap();
        assert_eq!(saved.ai_status, AiStatus::Failed);
        assert!(saved.ai_retryable);

        let router = ScriptedRouter::new().reply("m1", analysis_json("m1", 0.6));
        let recovered = AiMessageProcessor::new(Arc::new(router.clone()), store.clone());
        let report = recovered.process_batch(store.find_pending(10).await.unwrap()).await;
        assert_eq!((report.total, report.processed), (1, 1));
        assert_eq!(router.calls(), vec!["m1"]);
        assert_eq!(store.find_by_id("m1").await.unwrap().unwrap().ai_status, AiStatus::Completed);
    }

    #[tokio::test]
    async fn invalid_output_is_not_retried() {
        let store = Arc::new(InMemoryMessageStore::with_messages(vec![pending_message("m1")]));
        let router = ScriptedRouter::new().reply("m1", "no json here".to_string());
        let processor = AiMessageProcessor::new(Arc::new(router), store.clone());
        processor.process_batch(store.find_pending(10).await.unwrap()).await;

        assert!(!store.find_by_id("m1").await.unwrap().unwrap().ai_retryable);
        assert!(store.find_pending(10).await.unwrap().is_empty());
    }

    /// Accepts everything except completed analyses
    struct RejectCompleted(InMemoryMessageStore);

    #[async_trait::async_trait]
    impl MessageStore for RejectCompleted {
        async fn find_pending(&self, limit: usize) -> Result<Vec<Message>> {
            self.0.find_pending(limit).await
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Message>> {
            self.0.find_by_id(id).await
        }

        async fn save(&self, message: &Message) -> Result<()> {
            if message.ai_status == AiStatus::Completed {
                return Err(AiError::StoreError {
                    message: "disk full".to_string(),
                });
            }
            self.0.save(message).await
        }

        async fn count_by_status(&self, status: AiStatus) -> Result<usize> {
            self.0.count_by_status(status).await
        }
    }

    #[tokio::test]
    async fn lost_write_leaves_message_failed_not_processing() {
        let store = Arc::new(RejectCompleted(InMemoryMessageStore::with_messages(vec![pending_message("m1")])));
        let router = ScriptedRouter::new().reply("m1", analysis_json("m1", 0.8));
        let processor = AiMessageProcessor::new(Arc::new(router), store.clone());

        let message = store.find_by_id("m1").await.unwrap().unwrap();
        let outcome = processor.process_single_message(message, false).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("disk full"));

        let saved = store.find_by_id("m1").await.unwrap().unwrap();
        assert_eq!(saved.ai_status, AiStatus::Failed);
        assert!(saved.ai_analysis.is_none());
        assert_eq!(store.find_pending(10).await.unwrap().len(), 1);
    }

    /// Parks every call until `release` fires, recording arrival order
    #[derive(Default)]
    struct GatedRouter {
        release: Notify,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        arrivals: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl CompletionRouter for GatedRouter {
        async fn route(&self, _system: &str, user: &str) -> Result<ModelResponse> {
            let id = user
                .lines()
                .find_map(|line| line.strip_prefix("id: "))
                .unwrap_or_default()
                .to_string();
            self.arrivals.lock().unwrap().push(id.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            self.release.notified().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ModelResponse {
                content: analysis_json(&id, 0.5),
                model: "gated".to_string(),
                provider: Provider::Groq,
                tokens_used: 0,
            })
        }
    }

    #[tokio::test]
    async fn batch_bounds_concurrency_and_keeps_query_order() {
        let base = pending_message("m0").message_timestamp;
        let messages: Vec<Message> = (0..7)
            .map(|i| {
                let mut m = pending_message(&format!("m{i}"));
                m.message_timestamp = base + chrono::Duration::minutes(i);
                m
            })
            .collect();
        let store = Arc::new(InMemoryMessageStore::with_messages(messages));
        let router = Arc::new(GatedRouter::default());
        let processor = Arc::new(AiMessageProcessor::new(router.clone(), store.clone()).with_max_concurrent(3));

        let queue = store.find_pending(10).await.unwrap();
        let expected: Vec<String> = queue.iter().map(|m| m.id.clone()).collect();
        assert_eq!(expected[0], "m6");

        let batch = tokio::spawn({
            let processor = processor.clone();
            async move { processor.process_batch(queue).await }
        });

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while router.in_flight.load(Ordering::SeqCst) < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        // the window is full; nothing beyond it has been dispatched
        tokio::task::yield_now().await;
        assert_eq!(router.arrivals.lock().unwrap().clone(), expected[..3].to_vec());

        let report = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !batch.is_finished() {
                router.release.notify_waiters();
                tokio::task::yield_now().await;
            }
            batch.await.unwrap()
        })
        .await
        .unwrap();

        assert_eq!(report.processed, 7);
        let peak = router.peak.load(Ordering::SeqCst);
        assert!(peak > 1 && peak <= 3, "peak {peak}");
        assert_eq!(router.arrivals.lock().unwrap().clone(), expected);
    }

    #[test]
    fn picks_matching_record() {
        let records = vec![serde_json::json!({"id": "x"}), serde_json::json!({"id": 7})];
        assert_eq!(select_record(&records, "7").unwrap()["id"], 7);
        assert_eq!(select_record(&records, "zzz").unwrap()["id"], "x");
        assert!(select_record(&[], "x").is_none());
    }
}
