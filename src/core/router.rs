//! Model selection, fallback and usage statistics

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::adapter::{MeteredAdapter, ModelAdapter, ModelResponse};
use crate::core::config::{AppConfig, RoutingConfig};
use crate::core::credentials::{resolve_api_key, CredentialStore};
use crate::core::errors::{AiError, Result};
use crate::core::models::{
    usage_percentage, ModelUsage, Provider, RoutingStrategy, UsageStats, UsageStatus, UsageSummary,
};
use crate::core::token_estimator::TokenEstimator;
use crate::core::transport::{CompletionTransport, ProviderEndpoint};
use crate::core::usage::UsageTracker;

/// Something that can answer a prompt pair using some model
#[async_trait]
pub trait CompletionRouter: Send + Sync {
    async fn route(&self, system: &str, user: &str) -> Result<ModelResponse>;
}

/// Routes prompts across a prioritized fleet of metered adapters
pub struct ModelRouter {
    adapters: Vec<Arc<dyn ModelAdapter>>,
    routing: RoutingConfig,
    estimator: TokenEstimator,
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("adapters", &self.adapter_names())
            .field("routing", &self.routing)
            .finish()
    }
}

impl ModelRouter {
    /// Adapters are reordered so `routing.priority` names come first
    pub fn new(
        adapters: Vec<Arc<dyn ModelAdapter>>,
        routing: RoutingConfig,
        estimator: TokenEstimator,
    ) -> Self {
        let adapters = order_by_priority(adapters, &routing.priority);
        Self {
            adapters,
            routing,
            estimator,
        }
    }

    /// Fleet using the global provider keys
    pub fn from_config(
        config: &AppConfig,
        transport: Arc<dyn CompletionTransport>,
        usage: UsageTracker,
    ) -> Self {
        let endpoints: HashMap<Provider, ProviderEndpoint> = Provider::ALL
            .iter()
            .map(|p| (*p, config.endpoint(*p)))
            .collect();
        Self::with_endpoints(config, &endpoints, transport, usage)
    }

    /// Fleet bound to one user's keys, resolved once at construction.
    /// Providers without a valid personal key use the global one.
    pub async fn for_user(
        config: &AppConfig,
        transport: Arc<dyn CompletionTransport>,
        usage: UsageTracker,
        credentials: &dyn CredentialStore,
        user_id: &str,
    ) -> Result<Self> {
        let mut endpoints = HashMap::new();
        for provider in Provider::ALL {
            let api_key =
                resolve_api_key(credentials, user_id, provider.as_str(), config.api_key(provider))
                    .await?;
            endpoints.insert(
                provider,
                ProviderEndpoint {
                    base_url: config.base_url(provider),
                    api_key,
                },
            );
        }
        Ok(Self::with_endpoints(config, &endpoints, transport, usage))
    }

    fn with_endpoints(
        config: &AppConfig,
        endpoints: &HashMap<Provider, ProviderEndpoint>,
        transport: Arc<dyn CompletionTransport>,
        usage: UsageTracker,
    ) -> Self {
        let adapters = config
            .models
            .iter()
            .map(|descriptor| {
                let endpoint = endpoints
                    .get(&descriptor.provider)
                    .cloned()
                    .unwrap_or_else(|| config.endpoint(descriptor.provider));
                Arc::new(MeteredAdapter::new(
                    descriptor.clone(),
                    endpoint,
                    transport.clone(),
                    usage.clone(),
                    config.token_estimation,
                )) as Arc<dyn ModelAdapter>
            })
            .collect();
        Self::new(adapters, config.routing.clone(), config.token_estimation)
    }

    pub fn adapters(&self) -> &[Arc<dyn ModelAdapter>] {
        &self.adapters
    }

    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.routing.strategy
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    fn candidates(&self) -> Result<Vec<&Arc<dyn ModelAdapter>>> {
        match self.routing.strategy {
            RoutingStrategy::Single => {
                let name = self
                    .routing
                    .single_model
                    .as_deref()
                    .ok_or_else(|| AiError::config("single strategy requires single_model"))?;
                let adapter = self
                    .adapters
                    .iter()
                    .find(|a| a.name() == name)
                    .ok_or_else(|| AiError::config(format!("single model {} is not configured", name)))?;
                Ok(vec![adapter])
            }
            RoutingStrategy::Predictive | RoutingStrategy::Fallback => Ok(self.adapters.iter().collect()),
        }
    }

    /// Decide whether `adapter` may be called for a request of `estimated` tokens
    async fn admit(&self, adapter: &dyn ModelAdapter, estimated: u64) -> std::result::Result<(), String> {
        if !adapter.is_configured() {
            return Err("no credentials".to_string());
        }
        if !adapter.is_available().await {
            return Err("daily limit reached".to_string());
        }
        if self.routing.strategy == RoutingStrategy::Predictive {
            match adapter.remaining_tokens().await {
                Ok(Some(remaining)) if remaining < estimated => {
                    return Err(format!(
                        "needs ~{} tokens, {} remaining",
                        estimated, remaining
                    ));
                }
                Ok(_) => {}
                Err(e) => return Err(format!("usage lookup failed: {}", e)),
            }
        }
        Ok(())
    }

    /// Per-adapter usage and fleet totals. Read-only.
    pub async fn usage_stats(&self) -> Result<UsageStats> {
        let thresholds = &self.routing.thresholds;
        let mut models = Vec::with_capacity(self.adapters.len());
        let mut total_used = 0u64;
        let mut capped_used = 0u64;
        let mut capped_limit = 0u64;
        let mut total_available = 0u64;

        for adapter in &self.adapters {
            let used = adapter.tokens_used_today().await?;
            let limit = adapter.daily_token_limit();
            let available = limit.map(|l| l.saturating_sub(used));
            let percentage = limit.map(|l| usage_percentage(used, l));

            total_used += used;
            if let Some(l) = limit {
                capped_used += used;
                capped_limit += l;
                total_available += available.unwrap_or(0);
            }

            models.push(ModelUsage {
                model: adapter.name().to_string(),
                provider: adapter.provider(),
                used,
                limit,
                available,
                percentage: percentage.unwrap_or(0),
                status: UsageStatus::classify(used, limit, thresholds),
            });
        }

        let overall_percentage = if capped_limit > 0 {
            usage_percentage(capped_used, capped_limit)
        } else {
            0
        };

        Ok(UsageStats {
            models,
            summary: UsageSummary {
                total_used,
                total_available,
                overall_percentage,
            },
        })
    }
}

#[async_trait]
impl CompletionRouter for ModelRouter {
    async fn route(&self, system: &str, user: &str) -> Result<ModelResponse> {
        let estimated = self.estimator.estimate_prompt(system, user);
        let mut attempts = Vec::new();

        for adapter in self.candidates()? {
            if let Err(reason) = self.admit(adapter.as_ref(), estimated).await {
                debug!("Skipping {}: {}", adapter.name(), reason);
                attempts.push(format!("{}: {}", adapter.name(), reason));
                continue;
            }

            match adapter.call(system, user).await {
                Ok(response) => {
                    info!(
                        "Routed to {} ({}), {} tokens, estimate was {}",
                        response.model, response.provider, response.tokens_used, estimated
                    );
                    return Ok(response);
                }
                Err(e) => {
                    warn!("Model {} failed: {}", adapter.name(), e);
                    attempts.push(format!("{}: {}", adapter.name(), e));
                }
            }
        }

        warn!("All providers exhausted after {} attempts", attempts.len());
        Err(AiError::AllProvidersExhausted { attempts })
    }
}

fn order_by_priority(
    mut adapters: Vec<Arc<dyn ModelAdapter>>,
    priority: &[String],
) -> Vec<Arc<dyn ModelAdapter>> {
    let mut ordered = Vec::with_capacity(adapters.len());
    for name in priority {
        if let Some(pos) = adapters.iter().position(|a| a.name() == name) {
            ordered.push(adapters.remove(pos));
        }
    }
    ordered.extend(adapters);
    ordered
}
