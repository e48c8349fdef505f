//! Core data models for routing and usage accounting

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// LLM provider family, which also decides the wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Groq,
    Gemini,
    OpenRouter,
    Mistral,
    OpenAi,
    Anthropic,
}

impl Provider {
    /// All known providers
    pub const ALL: [Provider; 6] = [
        Provider::Groq,
        Provider::Gemini,
        Provider::OpenRouter,
        Provider::Mistral,
        Provider::OpenAi,
        Provider::Anthropic,
    ];

    /// Stable lowercase name, also used as the credential service name
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Groq => "groq",
            Provider::Gemini => "gemini",
            Provider::OpenRouter => "openrouter",
            Provider::Mistral => "mistral",
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }

    /// Prefix for this provider's environment variables
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Provider::Groq => "GROQ",
            Provider::Gemini => "GEMINI",
            Provider::OpenRouter => "OPENROUTER",
            Provider::Mistral => "MISTRAL",
            Provider::OpenAi => "OPENAI",
            Provider::Anthropic => "ANTHROPIC",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Mistral => "https://api.mistral.ai/v1",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown provider: {}", s))
    }
}

/// Static description of one routable model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    pub name: String,
    pub provider: Provider,
    /// `None` means the model is paid and has no daily cap
    pub daily_token_limit: Option<u64>,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub cost_per_token: f64,
}

impl AdapterDescriptor {
    pub fn new(
        name: impl Into<String>,
        provider: Provider,
        daily_token_limit: Option<u64>,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            daily_token_limit,
            max_output_tokens,
            cost_per_token: 0.0,
        }
    }

    pub fn with_cost_per_token(mut self, cost: f64) -> Self {
        self.cost_per_token = cost;
        self
    }
}

/// Default model table: (model, provider, daily limit, max output tokens, cost per token)
pub const DEFAULT_MODELS: &[(&str, Provider, Option<u64>, u32, f64)] = &[
    // Groq free tier
    ("llama-3.3-70b-versatile", Provider::Groq, Some(100_000), 8_192, 0.0),
    ("llama-3.1-8b-instant", Provider::Groq, Some(500_000), 8_192, 0.0),
    ("meta-llama/llama-4-scout-17b-16e-instruct", Provider::Groq, Some(500_000), 8_192, 0.0),
    ("meta-llama/llama-4-maverick-17b-128e-instruct", Provider::Groq, Some(500_000), 8_192, 0.0),
    ("deepseek-r1-distill-llama-70b", Provider::Groq, Some(100_000), 8_192, 0.0),
    ("qwen/qwen3-32b", Provider::Groq, Some(500_000), 8_192, 0.0),
    ("gemma2-9b-it", Provider::Groq, Some(500_000), 8_192, 0.0),
    // Gemini free tier
    ("gemini-2.0-flash", Provider::Gemini, Some(1_000_000), 8_192, 0.0),
    ("gemini-2.0-flash-lite", Provider::Gemini, Some(1_000_000), 8_192, 0.0),
    ("gemini-1.5-flash", Provider::Gemini, Some(1_000_000), 8_192, 0.0),
    ("gemini-1.5-flash-8b", Provider::Gemini, Some(1_000_000), 8_192, 0.0),
    // OpenRouter free models
    ("deepseek/deepseek-chat-v3-0324:free", Provider::OpenRouter, Some(200_000), 4_096, 0.0),
    ("meta-llama/llama-3.3-70b-instruct:free", Provider::OpenRouter, Some(200_000), 4_096, 0.0),
    ("google/gemma-3-27b-it:free", Provider::OpenRouter, Some(200_000), 4_096, 0.0),
    // Mistral experiment tier
    ("mistral-small-latest", Provider::Mistral, Some(500_000), 4_096, 0.0),
    ("open-mistral-nemo", Provider::Mistral, Some(500_000), 4_096, 0.0),
    // Paid fallbacks
    ("gpt-4o-mini", Provider::OpenAi, None, 4_096, 0.000_000_6),
    ("gpt-4.1-mini", Provider::OpenAi, None, 4_096, 0.000_001_6),
    ("claude-3-5-haiku-latest", Provider::Anthropic, None, 4_096, 0.000_004),
];

/// Build descriptors from the default table
pub fn default_descriptors() -> Vec<AdapterDescriptor> {
    DEFAULT_MODELS
        .iter()
        .map(|(name, provider, limit, max_tokens, cost)| {
            AdapterDescriptor::new(*name, *provider, *limit, *max_tokens).with_cost_per_token(*cost)
        })
        .collect()
}

/// How the router chooses adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    /// Skip adapters whose remaining budget cannot cover the estimate
    #[default]
    Predictive,
    /// Walk the priority list, advancing on any failure
    Fallback,
    /// Always use one configured model
    Single,
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingStrategy::Predictive => write!(f, "predictive"),
            RoutingStrategy::Fallback => write!(f, "fallback"),
            RoutingStrategy::Single => write!(f, "single"),
        }
    }
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "predictive" => Ok(RoutingStrategy::Predictive),
            "fallback" => Ok(RoutingStrategy::Fallback),
            "single" => Ok(RoutingStrategy::Single),
            other => Err(format!("unknown routing strategy: {}", other)),
        }
    }
}

/// Percentage cut-offs for usage status labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageThresholds {
    pub medium: u32,
    pub low: u32,
}

impl Default for UsageThresholds {
    fn default() -> Self {
        Self { medium: 50, low: 80 }
    }
}

/// Health label for one adapter's budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    Healthy,
    Medium,
    Low,
    Exhausted,
    Paid,
}

impl UsageStatus {
    /// Classify spend against a daily cap; `None` means no cap.
    /// Only a spent budget is `Exhausted`, whatever the rounded percentage says.
    pub fn classify(used: u64, limit: Option<u64>, thresholds: &UsageThresholds) -> Self {
        let Some(limit) = limit else {
            return UsageStatus::Paid;
        };
        if used >= limit {
            return UsageStatus::Exhausted;
        }
        match usage_percentage(used, limit) {
            p if p >= thresholds.low => UsageStatus::Low,
            p if p >= thresholds.medium => UsageStatus::Medium,
            _ => UsageStatus::Healthy,
        }
    }
}

impl fmt::Display for UsageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UsageStatus::Healthy => "healthy",
            UsageStatus::Medium => "medium",
            UsageStatus::Low => "low",
            UsageStatus::Exhausted => "exhausted",
            UsageStatus::Paid => "paid",
        };
        f.write_str(s)
    }
}

/// Usage row for one adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub provider: Provider,
    pub used: u64,
    pub limit: Option<u64>,
    pub available: Option<u64>,
    pub percentage: u32,
    pub status: UsageStatus,
}

/// Fleet-wide usage totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_used: u64,
    pub total_available: u64,
    pub overall_percentage: u32,
}

/// Answer of the usage endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub models: Vec<ModelUsage>,
    pub summary: UsageSummary,
}

/// Rounded percentage of `used` over `limit`
pub fn usage_percentage(used: u64, limit: u64) -> u32 {
    if limit == 0 {
        return 100;
    }
    ((used as f64 / limit as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_thresholds() {
        let t = UsageThresholds::default();
        let cap = Some(1000);
        assert_eq!(UsageStatus::classify(0, cap, &t), UsageStatus::Healthy);
        assert_eq!(UsageStatus::classify(490, cap, &t), UsageStatus::Healthy);
        assert_eq!(UsageStatus::classify(500, cap, &t), UsageStatus::Medium);
        assert_eq!(UsageStatus::classify(790, cap, &t), UsageStatus::Medium);
        assert_eq!(UsageStatus::classify(800, cap, &t), UsageStatus::Low);
        assert_eq!(UsageStatus::classify(990, cap, &t), UsageStatus::Low);
        assert_eq!(UsageStatus::classify(1000, cap, &t), UsageStatus::Exhausted);
        assert_eq!(UsageStatus::classify(1400, cap, &t), UsageStatus::Exhausted);
        assert_eq!(UsageStatus::classify(42, None, &t), UsageStatus::Paid);
    }

    #[test]
    fn near_full_budget_is_low_not_exhausted() {
        let t = UsageThresholds::default();
        assert_eq!(usage_percentage(995, 1000), 100);
        assert_eq!(UsageStatus::classify(995, Some(1000), &t), UsageStatus::Low);
        assert_eq!(UsageStatus::classify(0, Some(0), &t), UsageStatus::Exhausted);
    }

    #[test]
    fn percentage_rounds() {
        assert_eq!(usage_percentage(1, 3), 33);
        assert_eq!(usage_percentage(2, 3), 67);
        assert_eq!(usage_percentage(5, 0), 100);
    }

    #[test]
    fn default_table_is_data_driven() {
        let models = default_descriptors();
        assert_eq!(models.len(), DEFAULT_MODELS.len());
        assert!(models.iter().any(|m| m.daily_token_limit.is_none()));
        assert_eq!(models[0].provider, Provider::Groq);
    }

    #[test]
    fn provider_and_strategy_parse() {
        assert_eq!("OpenRouter".parse::<Provider>(), Ok(Provider::OpenRouter));
        assert!("nope".parse::<Provider>().is_err());
        assert_eq!("single".parse::<RoutingStrategy>(), Ok(RoutingStrategy::Single));
    }
}
