//! Configuration management

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::core::models::{default_descriptors, AdapterDescriptor, Provider, RoutingStrategy, UsageThresholds};
use crate::core::token_estimator::TokenEstimator;
use crate::core::transport::ProviderEndpoint;

/// Router behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub strategy: RoutingStrategy,
    /// Model names tried first, in this order; unlisted models follow in table order
    pub priority: Vec<String>,
    pub single_model: Option<String>,
    pub thresholds: UsageThresholds,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_keys: BTreeMap<Provider, String>,
    pub base_urls: BTreeMap<Provider, String>,
    pub models: Vec<AdapterDescriptor>,
    pub routing: RoutingConfig,
    pub token_estimation: TokenEstimator,
    pub request_timeout_secs: u64,
    pub max_concurrent: usize,
    pub lock_ttl_secs: u64,
    pub batch_limit: usize,
    pub max_prompt_chars: usize,
    pub data_dir: PathBuf,
    pub spool_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_keys: BTreeMap::new(),
            base_urls: BTreeMap::new(),
            models: default_descriptors(),
            routing: RoutingConfig::default(),
            token_estimation: TokenEstimator::default(),
            request_timeout_secs: 60,
            max_concurrent: 5,
            lock_ttl_secs: 900,
            batch_limit: 50,
            max_prompt_chars: 12_000,
            data_dir: PathBuf::from("data"),
            spool_dir: PathBuf::from("data/spool"),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", name, e)),
        _ => Ok(None),
    }
}

impl AppConfig {
    /// Defaults overlaid with environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from `AI_CONFIG_FILE` when set, then apply env overrides and validate
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("AI_CONFIG_FILE") {
            Ok(path) if !path.is_empty() => {
                info!("Loading configuration from {}", path);
                Self::from_file(path)?
            }
            _ => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;

        let keyed = Provider::ALL
            .iter()
            .filter(|p| config.api_key(**p).is_some())
            .count();
        info!(
            "Loaded {} models, {} providers with keys, strategy {}",
            config.models.len(),
            keyed,
            config.routing.strategy
        );

        Ok(config)
    }

    /// Load from a JSON or YAML file, chosen by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => serde_json::to_string_pretty(self)?,
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Overlay values from `lookup`, usually the process environment
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        for provider in Provider::ALL {
            let prefix = provider.env_prefix();
            if let Some(key) = lookup(&format!("{}_API_KEY", prefix)).filter(|k| !k.is_empty()) {
                self.api_keys.insert(provider, key);
            }
            if let Some(url) = lookup(&format!("{}_BASE_URL", prefix)).filter(|u| !u.is_empty()) {
                self.base_urls.insert(provider, url);
            }
        }

        if let Some(strategy) = lookup("AI_ROUTING_STRATEGY").filter(|s| !s.is_empty()) {
            self.routing.strategy = strategy
                .parse::<RoutingStrategy>()
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        if let Some(priority) = lookup("AI_MODEL_PRIORITY") {
            self.routing.priority = priority
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(single) = lookup("AI_SINGLE_MODEL").filter(|s| !s.is_empty()) {
            self.routing.single_model = Some(single);
        }

        if let Some(v) = parse_var(&lookup, "AI_AVG_CHARS_PER_TOKEN")? {
            self.token_estimation.average_chars_per_token = v;
        }
        if let Some(v) = parse_var(&lookup, "AI_SAFETY_BUFFER_PERCENTAGE")? {
            self.token_estimation.safety_buffer_percentage = v;
        }
        if let Some(v) = parse_var(&lookup, "AI_REQUEST_TIMEOUT_SECS")? {
            self.request_timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "AI_MAX_CONCURRENT")? {
            self.max_concurrent = v;
        }
        if let Some(v) = parse_var(&lookup, "SYNC_LOCK_TTL_SECS")? {
            self.lock_ttl_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "AI_BATCH_LIMIT")? {
            self.batch_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "AI_MAX_PROMPT_CHARS")? {
            self.max_prompt_chars = v;
        }
        if let Some(dir) = lookup("DATA_DIR").filter(|s| !s.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SPOOL_DIR").filter(|s| !s.is_empty()) {
            self.spool_dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.models.is_empty() {
            return Err(anyhow::anyhow!("at least one model must be configured"));
        }

        let mut names = HashSet::new();
        for model in &self.models {
            if !names.insert(model.name.as_str()) {
                return Err(anyhow::anyhow!("duplicate model name: {}", model.name));
            }
        }

        for name in &self.routing.priority {
            if !names.contains(name.as_str()) {
                return Err(anyhow::anyhow!("priority lists unknown model: {}", name));
            }
        }

        if self.routing.strategy == RoutingStrategy::Single {
            match &self.routing.single_model {
                Some(name) if names.contains(name.as_str()) => {}
                Some(name) => return Err(anyhow::anyhow!("single model {} is not configured", name)),
                None => return Err(anyhow::anyhow!("single strategy requires single_model")),
            }
        }

        let thresholds = &self.routing.thresholds;
        if thresholds.medium > thresholds.low || thresholds.low > 100 {
            return Err(anyhow::anyhow!("usage thresholds must satisfy medium <= low <= 100"));
        }

        if self.token_estimation.average_chars_per_token <= 0.0 {
            return Err(anyhow::anyhow!("average_chars_per_token must be greater than 0"));
        }

        if self.token_estimation.safety_buffer_percentage < 0.0 {
            return Err(anyhow::anyhow!("safety_buffer_percentage must not be negative"));
        }

        if self.max_concurrent == 0 {
            return Err(anyhow::anyhow!("max_concurrent must be greater than 0"));
        }

        if self.lock_ttl_secs == 0 || self.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("lock TTL and request timeout must be greater than 0"));
        }

        if self.api_keys.is_empty() {
            warn!("No provider API keys configured");
        }

        Ok(())
    }

    pub fn api_key(&self, provider: Provider) -> Option<&str> {
        self.api_keys
            .get(&provider)
            .map(String::as_str)
            .filter(|k| !k.trim().is_empty())
    }

    pub fn base_url(&self, provider: Provider) -> String {
        self.base_urls
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| provider.default_base_url().to_string())
    }

    /// Endpoint using the global key
    pub fn endpoint(&self, provider: Provider) -> ProviderEndpoint {
        ProviderEndpoint {
            base_url: self.base_url(provider),
            api_key: self.api_key(provider).map(str::to_string),
        }
    }

    /// Find model by name
    pub fn find_model(&self, name: &str) -> Option<&AdapterDescriptor> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_ttl_secs as i64)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
