//! Usage-metered model adapters

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::errors::{AiError, Result};
use crate::core::models::{AdapterDescriptor, Provider};
use crate::core::token_estimator::TokenEstimator;
use crate::core::transport::{CompletionRequest, CompletionTransport, ProviderEndpoint};
use crate::core::usage::UsageTracker;

/// Answer from a single model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    pub model: String,
    pub provider: Provider,
    pub tokens_used: u64,
}

/// A client for one model with its own daily budget
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    fn descriptor(&self) -> &AdapterDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn provider(&self) -> Provider {
        self.descriptor().provider
    }

    fn daily_token_limit(&self) -> Option<u64> {
        self.descriptor().daily_token_limit
    }

    fn cost_per_token(&self) -> f64 {
        self.descriptor().cost_per_token
    }

    /// Whether the adapter has what it needs to reach its provider
    fn is_configured(&self) -> bool {
        true
    }

    async fn tokens_used_today(&self) -> Result<u64>;

    /// Tokens left today, `None` for uncapped models
    async fn remaining_tokens(&self) -> Result<Option<u64>> {
        match self.daily_token_limit() {
            Some(limit) => Ok(Some(limit.saturating_sub(self.tokens_used_today().await?))),
            None => Ok(None),
        }
    }

    /// `used < limit`; uncapped models are always available
    async fn is_available(&self) -> bool {
        match self.remaining_tokens().await {
            Ok(Some(remaining)) => remaining > 0,
            Ok(None) => true,
            Err(e) => {
                warn!("Usage lookup failed for {}: {}", self.name(), e);
                false
            }
        }
    }

    async fn call(&self, system: &str, user: &str) -> Result<ModelResponse>;
}

/// The single data-driven adapter: descriptor + endpoint + transport + meter
pub struct MeteredAdapter {
    descriptor: AdapterDescriptor,
    endpoint: ProviderEndpoint,
    transport: Arc<dyn CompletionTransport>,
    usage: UsageTracker,
    estimator: TokenEstimator,
}

impl std::fmt::Debug for MeteredAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteredAdapter")
            .field("descriptor", &self.descriptor)
            .field("base_url", &self.endpoint.base_url)
            .field("has_key", &self.endpoint.api_key.is_some())
            .finish()
    }
}

impl MeteredAdapter {
    pub fn new(
        descriptor: AdapterDescriptor,
        endpoint: ProviderEndpoint,
        transport: Arc<dyn CompletionTransport>,
        usage: UsageTracker,
        estimator: TokenEstimator,
    ) -> Self {
        Self {
            descriptor,
            endpoint,
            transport,
            usage,
            estimator,
        }
    }

    pub fn endpoint(&self) -> &ProviderEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl ModelAdapter for MeteredAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn is_configured(&self) -> bool {
        self.endpoint
            .api_key
            .as_deref()
            .map_or(false, |k| !k.trim().is_empty())
    }

    async fn tokens_used_today(&self) -> Result<u64> {
        self.usage.used_today(&self.descriptor).await
    }

    async fn call(&self, system: &str, user: &str) -> Result<ModelResponse> {
        if !self.is_available().await {
            return Err(AiError::LimitExceeded {
                model: self.descriptor.name.clone(),
            });
        }

        let completion = self
            .transport
            .complete(CompletionRequest {
                model: &self.descriptor.name,
                provider: self.descriptor.provider,
                system,
                user,
                max_output_tokens: self.descriptor.max_output_tokens,
                endpoint: &self.endpoint,
            })
            .await?;

        let tokens_used = match completion.tokens_used {
            Some(tokens) => tokens,
            None => {
                let estimated = self.estimator.estimate_prompt(system, user)
                    + self.estimator.estimate(&completion.content);
                debug!(
                    "{} reported no usage, estimating {} tokens",
                    self.descriptor.name, estimated
                );
                estimated
            }
        };

        if let Err(e) = self.usage.track(&self.descriptor, tokens_used).await {
            warn!("Failed to track token usage for {}: {}", self.descriptor.name, e);
        }

        Ok(ModelResponse {
            content: completion.content,
            model: self.descriptor.name.clone(),
            provider: self.descriptor.provider,
            tokens_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fleet_fixture, ScriptedTransport};

    #[tokio::test]
    async fn call_tracks_reported_usage() {
        let transport = ScriptedTransport::new().reply("a", "{}", Some(120));
        let fx = fleet_fixture(&[("a", Some(1000))], transport.clone());
        let adapter = &fx.adapters[0];

        let response = adapter.call("sys", "user").await.unwrap();
        assert_eq!(response.tokens_used, 120);
        assert_eq!(adapter.tokens_used_today().await.unwrap(), 120);
        assert_eq!(adapter.remaining_tokens().await.unwrap(), Some(880));
        assert_eq!(transport.calls(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn call_estimates_when_usage_missing() {
        let transport = ScriptedTransport::new().reply("a", "abcd", None);
        let fx = fleet_fixture(&[("a", Some(1000))], transport);
        let adapter = &fx.adapters[0];

        let response = adapter.call("abcd", "abcd").await.unwrap();
        // three 4-char strings -> 1 token each, +20% rounds up to 2
        assert_eq!(response.tokens_used, 6);
    }

    #[tokio::test]
    async fn exhausted_adapter_fails_fast() {
        let transport = ScriptedTransport::new().reply("a", "{}", Some(10));
        let fx = fleet_fixture(&[("a", Some(100))], transport.clone());
        fx.usage.track(fx.adapters[0].descriptor(), 100).await.unwrap();

        assert!(!fx.adapters[0].is_available().await);
        let err = fx.adapters[0].call("s", "u").await.unwrap_err();
        assert!(matches!(err, AiError::LimitExceeded { .. }));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn provider_errors_do_not_track_usage() {
        let transport = ScriptedTransport::new().fail("a", 503, "overloaded");
        let fx = fleet_fixture(&[("a", Some(100))], transport);

        let err = fx.adapters[0].call("s", "u").await.unwrap_err();
        assert!(matches!(err, AiError::ProviderError { status: 503, .. }));
        assert_eq!(fx.adapters[0].tokens_used_today().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn uncapped_adapter_always_available() {
        let fx = fleet_fixture(&[("paid", None)], ScriptedTransport::new());
        fx.usage
            .track(fx.adapters[0].descriptor(), 5_000_000)
            .await
            .unwrap();
        assert!(fx.adapters[0].is_available().await);
        assert_eq!(fx.adapters[0].remaining_tokens().await.unwrap(), None);
    }
}
