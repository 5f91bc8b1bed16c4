//! Upstream provider credential canary
//!
//! A canary is one minimal, low-cost upstream call made with a tenant's key.
//! It runs at admission time (before a deploy is queued) and again after the
//! tenant's container starts, gating whether the tenant is marked live.

pub mod http;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

pub use http::{CanaryEndpoints, HttpCanary};

/// Upstream model provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Gemini,
    OpenAi,
    Anthropic,
}

impl Provider {
    /// Provider implied by a model name.
    ///
    /// Unrecognized models map to `None`, which callers treat as "skip the
    /// canary" rather than a failure.
    pub fn from_model(model: &str) -> Option<Self> {
        let normalized = model.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        if normalized.contains("gemini") || normalized.starts_with("google/") {
            return Some(Provider::Gemini);
        }
        if normalized.contains("gpt") || normalized.starts_with("openai/") {
            return Some(Provider::OpenAi);
        }
        if normalized.contains("claude") || normalized.starts_with("anthropic/") {
            return Some(Provider::Anthropic);
        }
        None
    }

    /// Provider named by its exact model key
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "gemini" => Some(Provider::Gemini),
            "gpt" => Some(Provider::OpenAi),
            "claude" => Some(Provider::Anthropic),
            _ => None,
        }
    }

    /// Short model key used by tenants
    pub fn model_key(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "gpt",
            Provider::Anthropic => "claude",
        }
    }

    /// Human-readable vendor name
    pub fn label(&self) -> &'static str {
        match self {
            Provider::Gemini => "Gemini",
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a credential canary did not pass
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanaryFailure {
    #[error("API key cannot be empty.")]
    EmptyKey,

    #[error("No API key available for {0} runtime canary.")]
    MissingKey(Provider),

    #[error("{provider} key rejected: {message}")]
    Rejected {
        provider: Provider,
        message: String,
        status: Option<u16>,
    },

    #[error("Key test timed out. Please try again.")]
    Timeout,

    #[error("Unable to validate API key right now ({0}).")]
    Unreachable(String),
}

impl CanaryFailure {
    /// Upstream HTTP status, when the provider answered
    pub fn status(&self) -> Option<u16> {
        match self {
            CanaryFailure::Rejected { status, .. } => *status,
            _ => None,
        }
    }
}

/// Tests a provider credential with one upstream call
#[async_trait]
pub trait CredentialCanary: Send + Sync {
    /// Returns a confirmation message when the key is accepted
    async fn test_key(&self, provider: Provider, api_key: &SecretString) -> Result<String, CanaryFailure>;
}

/// Message reported when the model has no known provider
pub const SKIPPED_UNKNOWN_PROVIDER: &str = "Skipped runtime canary (unknown provider).";

/// Run the canary a deployment of `model` needs.
///
/// Unknown models pass without an upstream call. Known providers require a key.
pub async fn run_canary(
    canary: &dyn CredentialCanary,
    model: &str,
    api_key: Option<&SecretString>,
) -> Result<String, CanaryFailure> {
    let Some(provider) = Provider::from_model(model) else {
        return Ok(SKIPPED_UNKNOWN_PROVIDER.to_string());
    };

    match api_key {
        Some(key) => canary.test_key(provider, key).await,
        None => Err(CanaryFailure::MissingKey(provider)),
    }
}
