//! Credential canary over the providers' HTTP APIs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::debug;

use crate::canary::{CanaryFailure, CredentialCanary, Provider};
use crate::errors::DeployError;

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Cheapest Gemini model to probe with
const GEMINI_PROBE_MODEL: &str = "gemini-2.5-flash";

/// Base URLs of the provider APIs
#[derive(Debug, Clone)]
pub struct CanaryEndpoints {
    pub gemini: String,
    pub openai: String,
    pub anthropic: String,
}

impl Default for CanaryEndpoints {
    fn default() -> Self {
        Self {
            gemini: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            openai: "https://api.openai.com/v1".to_string(),
            anthropic: "https://api.anthropic.com/v1".to_string(),
        }
    }
}

impl CanaryEndpoints {
    /// Point every provider at the same base URL (used against local mocks)
    pub fn uniform(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        Self {
            gemini: base.clone(),
            openai: base.clone(),
            anthropic: base,
        }
    }
}

/// Canary that calls the real provider endpoints
pub struct HttpCanary {
    client: Client,
    endpoints: CanaryEndpoints,
    timeout: Duration,
}

impl HttpCanary {
    /// Create a canary bounded by `timeout` per check
    pub fn new(endpoints: CanaryEndpoints, timeout: Duration) -> Result<Self, DeployError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoints,
            timeout,
        })
    }

    fn request(&self, provider: Provider, key: &str) -> RequestBuilder {
        match provider {
            Provider::Gemini => self
                .client
                .post(format!(
                    "{}/models/{}:generateContent",
                    self.endpoints.gemini.trim_end_matches('/'),
                    GEMINI_PROBE_MODEL
                ))
                .query(&[("key", key)])
                .json(&json!({
                    "contents": [{ "parts": [{ "text": "Reply with: OK" }] }],
                    "generationConfig": { "maxOutputTokens": 8 },
                })),
            Provider::OpenAi => self
                .client
                .get(format!("{}/models", self.endpoints.openai.trim_end_matches('/')))
                .bearer_auth(key),
            Provider::Anthropic => self
                .client
                .get(format!("{}/models", self.endpoints.anthropic.trim_end_matches('/')))
                .header("x-api-key", key)
                .header("anthropic-version", ANTHROPIC_VERSION),
        }
    }
}

/// Pull the most specific error message out of a provider error body
async fn extract_error_message(response: Response, fallback: &str) -> String {
    let Ok(body) = response.json::<Value>().await else {
        return fallback.to_string();
    };

    body.pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| body.get("message").and_then(Value::as_str))
        .or_else(|| body.get("error").and_then(Value::as_str))
        .unwrap_or(fallback)
        .to_string()
}

#[async_trait]
impl CredentialCanary for HttpCanary {
    async fn test_key(&self, provider: Provider, api_key: &SecretString) -> Result<String, CanaryFailure> {
        let key = api_key.expose_secret().trim();
        if key.is_empty() {
            return Err(CanaryFailure::EmptyKey);
        }

        debug!(provider = %provider, "Running credential canary");

        let response = match tokio::time::timeout(self.timeout, self.request(provider, key).send()).await {
            Err(_) => return Err(CanaryFailure::Timeout),
            Ok(Err(e)) if e.is_timeout() => return Err(CanaryFailure::Timeout),
            // reqwest errors can carry the URL, which holds the Gemini key
            Ok(Err(_)) => {
                return Err(CanaryFailure::Unreachable("network/runtime error".to_string()))
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            let fallback = format!("{} key validation failed.", provider);
            let message = extract_error_message(response, &fallback).await;
            return Err(CanaryFailure::Rejected {
                provider,
                message,
                status: Some(status.as_u16()),
            });
        }

        Ok(format!("{} key is valid.", provider))
    }
}
