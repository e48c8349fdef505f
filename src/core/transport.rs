//! HTTP wire formats for the supported LLM providers

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::core::errors::{AiError, Result};
use crate::core::models::Provider;

/// Where and how to reach a provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

/// One chat completion to perform
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub provider: Provider,
    pub system: &'a str,
    pub user: &'a str,
    pub max_output_tokens: u32,
    pub endpoint: &'a ProviderEndpoint,
}

/// Text answer plus the token count the provider reported, if any
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tokens_used: Option<u64>,
}

/// Performs the network half of an adapter call
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion>;
}

/// reqwest-backed transport with a bounded per-request timeout
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion> {
        let api_key = request.endpoint.api_key.as_deref().ok_or_else(|| {
            AiError::config(format!("no API key configured for {}", request.provider))
        })?;
        let base = request.endpoint.base_url.trim_end_matches('/');

        let builder = match request.provider {
            Provider::Anthropic => self
                .client
                .post(format!("{}/v1/messages", base))
                .header("x-api-key", api_key)
                .header("anthropic-version", "2023-06-01"),
            Provider::Gemini => self
                .client
                .post(format!("{}/v1beta/models/{}:generateContent", base, request.model))
                .header("x-goog-api-key", api_key),
            _ => self
                .client
                .post(format!("{}/chat/completions", base))
                .header("Authorization", format!("Bearer {}", api_key)),
        };

        debug!("Calling {} model {}", request.provider, request.model);

        let response = builder
            .header("Content-Type", "application/json")
            .json(&request_body(&request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::TimeoutError
                } else {
                    AiError::NetworkError {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::ProviderError {
                model: request.model.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = response.json().await.map_err(|e| AiError::NetworkError {
            message: format!("unreadable response body: {}", e),
        })?;

        parse_response(request.provider, &json).ok_or_else(|| AiError::ProviderError {
            model: request.model.to_string(),
            status: status.as_u16(),
            body: format!("no completion text in response: {}", json),
        })
    }
}

/// JSON body for the provider's completion endpoint
pub fn request_body(request: &CompletionRequest<'_>) -> Value {
    match request.provider {
        Provider::Anthropic => json!({
            "model": request.model,
            "system": request.system,
            "max_tokens": request.max_output_tokens,
            "temperature": 0.2,
            "messages": [{ "role": "user", "content": request.user }],
        }),
        Provider::Gemini => json!({
            "systemInstruction": { "parts": [{ "text": request.system }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.user }] }],
            "generationConfig": {
                "maxOutputTokens": request.max_output_tokens,
                "temperature": 0.2,
                "responseMimeType": "application/json",
            },
        }),
        _ => json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_output_tokens,
            "temperature": 0.2,
        }),
    }
}

/// Pull the completion text and reported token usage out of a response
pub fn parse_response(provider: Provider, json: &Value) -> Option<Completion> {
    match provider {
        Provider::Anthropic => {
            let content = json["content"]
                .as_array()?
                .iter()
                .filter_map(|block| block["text"].as_str())
                .collect::<Vec<_>>()
                .join("");
            let usage = &json["usage"];
            let tokens_used = match (usage["input_tokens"].as_u64(), usage["output_tokens"].as_u64()) {
                (None, None) => None,
                (input, output) => Some(input.unwrap_or(0) + output.unwrap_or(0)),
            };
            Some(Completion { content, tokens_used })
        }
        Provider::Gemini => {
            let content = json["candidates"]
                .get(0)?["content"]["parts"]
                .as_array()?
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<Vec<_>>()
                .join("");
            let tokens_used = json["usageMetadata"]["totalTokenCount"].as_u64();
            Some(Completion { content, tokens_used })
        }
        _ => {
            let content = json["choices"]
                .get(0)
                .and_then(|c| c["message"]["content"].as_str())?
                .to_string();
            let tokens_used = json["usage"]["total_tokens"].as_u64();
            Some(Completion { content, tokens_used })
        }
    }
}
