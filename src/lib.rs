//! Inbox AI Router - usage-metered LLM dispatch for message analysis
//!
//! Routes analysis prompts across a prioritized fleet of provider models, each
//! with its own daily token budget, normalizes and validates what the models
//! return, and serializes batch sync and AI runs behind TTL locks.

#![forbid(unsafe_code)]

pub mod cli;
pub mod context;
pub mod core;
pub mod processors;
pub mod server;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use crate::core::{
    adapter::{MeteredAdapter, ModelAdapter, ModelResponse},
    config::AppConfig,
    errors::{AiError, Result},
    models::{AdapterDescriptor, Provider, RoutingStrategy, UsageStats},
    router::{CompletionRouter, ModelRouter},
    token_estimator::TokenEstimator,
};

pub use context::AppContext;

pub use processors::{
    analysis::AiMessageResponse,
    message_processor::{AiMessageProcessor, BatchReport, ProcessOutcome},
    normalizer::normalize,
};

pub use sync::{LockKey, SyncOrchestrator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
