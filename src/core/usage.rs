//! Daily token usage tracking against the shared store

use std::sync::Arc;
use tracing::{debug, info};

use crate::core::cache::CacheStore;
use crate::core::clock::{local_day, until_end_of_day, Clock};
use crate::core::errors::Result;
use crate::core::models::AdapterDescriptor;

/// Per-model daily counters keyed by `provider_model_date`
#[derive(Debug, Clone)]
pub struct UsageTracker {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl UsageTracker {
    pub fn new(cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    /// Counter key for today
    pub fn key(&self, descriptor: &AdapterDescriptor) -> String {
        format!(
            "ai_usage_{}_{}_{}",
            descriptor.provider,
            descriptor.name,
            local_day(self.clock.now())
        )
    }

    /// Tokens recorded for the model since local midnight
    pub async fn used_today(&self, descriptor: &AdapterDescriptor) -> Result<u64> {
        let used = self.cache.get(&self.key(descriptor)).await?.unwrap_or(0);
        Ok(used.max(0) as u64)
    }

    /// Tokens left today; `None` when the model has no cap
    pub async fn remaining(&self, descriptor: &AdapterDescriptor) -> Result<Option<u64>> {
        match descriptor.daily_token_limit {
            Some(limit) => Ok(Some(limit.saturating_sub(self.used_today(descriptor).await?))),
            None => Ok(None),
        }
    }

    /// Record tokens; the counter expires at the end of the local day
    pub async fn track(&self, descriptor: &AdapterDescriptor, tokens: u64) -> Result<u64> {
        let now = self.clock.now();
        let total = self
            .cache
            .increment(&self.key(descriptor), tokens as i64, Some(until_end_of_day(now)))
            .await?;
        debug!(
            "Tracked {} tokens for {}, {} used today",
            tokens, descriptor.name, total
        );
        Ok(total.max(0) as u64)
    }

    /// Clear today's counter (manual reset)
    pub async fn reset(&self, descriptor: &AdapterDescriptor) -> Result<()> {
        self.cache.forget(&self.key(descriptor)).await?;
        info!("Token usage reset for {}", descriptor.name);
        Ok(())
    }
}
