//! Per-user provider API keys

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::errors::Result;

/// A stored provider key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCredential {
    pub key: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl ApiCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            active: true,
            expires_at: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.active
            && !self.key.trim().is_empty()
            && self.expires_at.map_or(true, |at| now < at)
    }
}

/// Lookup of keys by `(user_id, service_name)`
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_api_key(&self, user_id: &str, service: &str) -> Result<Option<ApiCredential>>;
}

/// Map-backed credential store
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    keys: RwLock<HashMap<(String, String), ApiCredential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: &str, service: &str, credential: ApiCredential) {
        self.keys
            .write()
            .await
            .insert((user_id.to_string(), service.to_string()), credential);
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_api_key(&self, user_id: &str, service: &str) -> Result<Option<ApiCredential>> {
        let keys = self.keys.read().await;
        Ok(keys.get(&(user_id.to_string(), service.to_string())).cloned())
    }
}

/// The user's key when present and valid, otherwise the global one
pub async fn resolve_api_key(
    store: &dyn CredentialStore,
    user_id: &str,
    service: &str,
    global: Option<&str>,
) -> Result<Option<String>> {
    match store.get_api_key(user_id, service).await? {
        Some(credential) if credential.is_valid() => {
            debug!("Using personal {} key for user {}", service, user_id);
            Ok(Some(credential.key))
        }
        Some(_) => {
            debug!("Personal {} key for user {} is invalid, using default", service, user_id);
            Ok(global.map(str::to_string))
        }
        None => Ok(global.map(str::to_string)),
    }
}
