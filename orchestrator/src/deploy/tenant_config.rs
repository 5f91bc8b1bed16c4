//! Per-tenant runtime configuration document
//!
//! The document is the only channel through which credentials reach a tenant
//! container. Only the tenant's own key is written, and only when supplied.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::canary::Provider;
use crate::errors::DeployError;
use crate::models::tenant::is_valid_tenant_id;
use crate::storage::layout::TenantLayout;
use crate::utils::sha256_hash;

/// Inputs for one tenant config document
pub struct TenantConfigParams<'a> {
    pub tenant_id: &'a str,
    pub bot_token: &'a str,
    /// Model key as selected by the tenant
    pub model: &'a str,
    /// Resolved upstream model id
    pub model_id: &'a str,
    pub api_key: Option<&'a str>,
    pub gateway_token: &'a str,
}

#[derive(Debug, Serialize)]
pub struct TenantConfig<'a> {
    pub gateway: GatewayConfig<'a>,
    pub agents: AgentsConfig<'a>,
    pub channels: ChannelsConfig<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig<'a>>,
}

#[derive(Debug, Serialize)]
pub struct GatewayConfig<'a> {
    pub port: u16,
    pub mode: &'static str,
    pub bind: &'static str,
    pub auth: GatewayAuth<'a>,
}

#[derive(Debug, Serialize)]
pub struct GatewayAuth<'a> {
    pub token: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AgentsConfig<'a> {
    pub defaults: AgentDefaults<'a>,
}

#[derive(Debug, Serialize)]
pub struct AgentDefaults<'a> {
    pub model: PrimaryModel<'a>,
}

#[derive(Debug, Serialize)]
pub struct PrimaryModel<'a> {
    pub primary: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ChannelsConfig<'a> {
    pub telegram: TelegramChannel<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannel<'a> {
    pub enabled: bool,
    pub bot_token: &'a str,
    pub dm_policy: &'static str,
    pub allow_from: Vec<&'static str>,
    pub group_policy: &'static str,
    pub groups: BTreeMap<&'static str, GroupPolicy>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPolicy {
    pub require_mention: bool,
    pub group_policy: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelsConfig<'a> {
    pub mode: &'static str,
    pub providers: BTreeMap<&'static str, ProviderOverride<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOverride<'a> {
    pub base_url: &'static str,
    pub api_key: &'a str,
    pub api: &'static str,
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub id: &'static str,
    pub name: &'static str,
}

/// Provider block for `model`, when a key was supplied and the provider is known
fn provider_override<'a>(
    model: &str,
    api_key: Option<&'a str>,
) -> Option<(&'static str, ProviderOverride<'a>)> {
    let api_key = api_key.map(str::trim).filter(|k| !k.is_empty())?;
    let provider = Provider::from_model(model)?;

    let (name, base_url, api, entry) = match provider {
        Provider::OpenAi => (
            "openai",
            "https://api.openai.com/v1",
            "openai-completions",
            ModelEntry { id: "gpt-4.1", name: "GPT-4.1" },
        ),
        Provider::Anthropic => (
            "anthropic",
            "https://api.anthropic.com/v1",
            "anthropic-messages",
            ModelEntry { id: "claude-sonnet-4", name: "Claude Sonnet 4" },
        ),
        Provider::Gemini => (
            "google",
            "https://generativelanguage.googleapis.com/v1beta",
            "google-generative-ai",
            ModelEntry { id: "gemini-2.5-pro", name: "Gemini 2.5 Pro" },
        ),
    };

    Some((
        name,
        ProviderOverride {
            base_url,
            api_key,
            api,
            models: vec![entry],
        },
    ))
}

/// Build the config document for a tenant
pub fn render<'a>(params: &TenantConfigParams<'a>, gateway_port: u16) -> TenantConfig<'a> {
    let models = provider_override(params.model, params.api_key).map(|(name, block)| ModelsConfig {
        mode: "merge",
        providers: BTreeMap::from([(name, block)]),
    });

    TenantConfig {
        gateway: GatewayConfig {
            port: gateway_port,
            mode: "local",
            bind: "loopback",
            auth: GatewayAuth {
                token: params.gateway_token,
            },
        },
        agents: AgentsConfig {
            defaults: AgentDefaults {
                model: PrimaryModel {
                    primary: params.model_id,
                },
            },
        },
        channels: ChannelsConfig {
            telegram: TelegramChannel {
                enabled: true,
                bot_token: params.bot_token,
                dm_policy: "open",
                allow_from: vec!["*"],
                group_policy: "open",
                groups: BTreeMap::from([(
                    "*",
                    GroupPolicy {
                        require_mention: false,
                        group_policy: "open",
                    },
                )]),
            },
        },
        models,
    }
}

fn validate_tenant_id(tenant_id: &str) -> Result<(), DeployError> {
    if !is_valid_tenant_id(tenant_id) {
        return Err(DeployError::ConfigWriteError(format!("Invalid tenant id: {:?}", tenant_id)));
    }
    Ok(())
}

/// Writes tenant config documents under a [`TenantLayout`]
#[derive(Debug, Clone)]
pub struct TenantConfigWriter {
    layout: TenantLayout,
    gateway_port: u16,
}

impl TenantConfigWriter {
    pub fn new(layout: TenantLayout, gateway_port: u16) -> Self {
        Self { layout, gateway_port }
    }

    pub fn layout(&self) -> &TenantLayout {
        &self.layout
    }

    /// Create the tenant directory if needed and write its config document.
    /// Returns the path written.
    pub async fn write(&self, params: &TenantConfigParams<'_>) -> Result<PathBuf, DeployError> {
        validate_tenant_id(params.tenant_id)?;

        let dir = self.layout.tenant_dir(params.tenant_id);
        dir.create()
            .await
            .map_err(|e| DeployError::ConfigWriteError(format!("{}: {}", dir.path().display(), e)))?;

        let document = render(params, self.gateway_port);
        let contents = serde_json::to_vec_pretty(&document)?;

        let file = self.layout.config_file(params.tenant_id);
        file.write_atomic(&contents)
            .await
            .map_err(|e| DeployError::ConfigWriteError(format!("{}: {}", file.path().display(), e)))?;

        let digest = sha256_hash(&contents);
        info!(
            tenant_id = params.tenant_id,
            digest = &digest[..12],
            provider_override = document.models.is_some(),
            "Wrote tenant config"
        );
        Ok(file.path().to_path_buf())
    }
}
