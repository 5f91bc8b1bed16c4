//! Tenant models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::status_enum;

/// Channel used when neither the job nor the tenant names one
pub const DEFAULT_CHANNEL: &str = "telegram";

/// Model used when neither the job nor the tenant names one
pub const DEFAULT_MODEL: &str = "gpt";

/// Tenant ids name a directory and appear in `-v <src>:<dst>` mount
/// arguments, so they are limited to ASCII alphanumerics, `-` and `_`.
pub fn is_valid_tenant_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

status_enum! {
    /// Lifecycle status of a tenant
    TenantStatus {
        Pending => "PENDING",
        Deploying => "DEPLOYING",
        Live => "LIVE",
        Stopped => "STOPPED",
        Error => "ERROR",
    }
}

status_enum! {
    /// Mirror of the tenant container's health
    RuntimeStatus {
        Pending => "PENDING",
        Queued => "QUEUED",
        Stopping => "STOPPING",
        Live => "LIVE",
        Stopped => "STOPPED",
        Error => "ERROR",
    }
}

/// One deployable agent unit ("bot")
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    /// Unique tenant ID
    pub id: String,

    /// Inbound channel credential (the bot token)
    pub token: String,

    /// Selected model identifier (e.g. "gpt", "claude", "gemini")
    pub model: Option<String>,

    /// Selected channel kind
    pub channel: Option<String>,

    /// Tenant's own upstream provider key
    pub api_key: Option<String>,

    pub status: TenantStatus,
    pub runtime_status: RuntimeStatus,

    pub container_name: Option<String>,
    pub container_id: Option<String>,
    pub runtime_port: Option<u16>,

    /// Gateway auth token written into the tenant config
    pub webhook_secret: Option<String>,

    /// Registered inbound webhook, if any
    pub webhook_url: Option<String>,

    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Create a freshly provisioned tenant
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
            model: None,
            channel: None,
            api_key: None,
            status: TenantStatus::Pending,
            runtime_status: RuntimeStatus::Pending,
            container_name: None,
            container_id: None,
            runtime_port: None,
            webhook_secret: None,
            webhook_url: None,
            last_heartbeat_at: None,
            created_at: Utc::now(),
        }
    }

    /// Drop every runtime-identity field
    pub fn clear_runtime(&mut self) {
        self.container_name = None;
        self.container_id = None;
        self.runtime_port = None;
        self.webhook_secret = None;
        self.webhook_url = None;
    }

    pub fn set_status(&mut self, status: TenantStatus, runtime_status: RuntimeStatus) {
        self.status = status;
        self.runtime_status = runtime_status;
    }
}

// Hand-written so credentials never reach a log line through `{:?}`
impl std::fmt::Debug for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tenant")
            .field("id", &self.id)
            .field("token", &"***")
            .field("model", &self.model)
            .field("channel", &self.channel)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("status", &self.status)
            .field("runtime_status", &self.runtime_status)
            .field("container_name", &self.container_name)
            .field("container_id", &self.container_id)
            .field("runtime_port", &self.runtime_port)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}
