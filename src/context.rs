//! Wiring of the shared services used by the server and the CLI

use std::sync::Arc;
use tracing::info;

use crate::core::cache::{CacheStore, InMemoryCache};
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::AppConfig;
use crate::core::router::ModelRouter;
use crate::core::transport::{CompletionTransport, HttpTransport};
use crate::core::usage::UsageTracker;
use crate::processors::message_processor::AiMessageProcessor;
use crate::processors::prompt::PromptBuilder;
use crate::storage::{JsonFileMessageStore, MessageStore};
use crate::sync::{MessageSource, MessageSyncService, SpoolDirSource, SyncOrchestrator};

/// Everything a request or command needs, built once per process
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub cache: Arc<dyn CacheStore>,
    pub router: Arc<ModelRouter>,
    pub store: Arc<dyn MessageStore>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl AppContext {
    /// Production wiring: HTTP transport, JSON file store, spool directory source
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.request_timeout())?);
        let store = Arc::new(JsonFileMessageStore::new(config.data_dir.join("messages.json")));
        let source = Arc::new(SpoolDirSource::new(config.spool_dir.clone()));
        info!(
            "Using message store {} and spool {}",
            store.path().display(),
            config.spool_dir.display()
        );
        Ok(Self::assemble(config, transport, store, source, Arc::new(SystemClock)))
    }

    pub fn assemble(
        config: AppConfig,
        transport: Arc<dyn CompletionTransport>,
        store: Arc<dyn MessageStore>,
        source: Arc<dyn MessageSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCache::new(clock.clone()));
        let usage = UsageTracker::new(cache.clone(), clock.clone());
        let router = Arc::new(ModelRouter::from_config(&config, transport, usage));

        let processor = Arc::new(
            AiMessageProcessor::new(router.clone(), store.clone())
                .with_prompts(PromptBuilder::new(config.max_prompt_chars))
                .with_clock(clock.clone())
                .with_max_concurrent(config.max_concurrent),
        );
        let sync = Arc::new(MessageSyncService::new(source, store.clone()));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            cache.clone(),
            clock,
            sync,
            processor,
            config.lock_ttl(),
        ));

        Self {
            config: Arc::new(config),
            cache,
            router,
            store,
            orchestrator,
        }
    }
}
