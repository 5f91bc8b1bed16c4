//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::status_enum;

status_enum! {
    /// Status of one deploy attempt
    DeploymentStatus {
        Pending => "PENDING",
        InProgress => "IN_PROGRESS",
        Success => "SUCCESS",
        Failed => "FAILED",
    }
}

/// Audit record of one user-initiated deploy attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    /// Owning tenant
    pub tenant_id: String,

    pub status: DeploymentStatus,

    /// Append-only log text
    pub logs: String,

    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Deployment {
    /// Create a pending deployment seeded with its first log line
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            status: DeploymentStatus::Pending,
            logs: "Queued deployment for container runtime...\n".to_string(),
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// Summary appended to a deployment once its runtime is live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSummary {
    pub container_name: String,
    pub port: u16,
    pub model_id: String,
    pub transport: String,
}

impl std::fmt::Display for DeploymentSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Container runtime started successfully")?;
        writeln!(f, "Container: {}", self.container_name)?;
        writeln!(f, "Port: {}", self.port)?;
        writeln!(f, "Model: {}", self.model_id)?;
        writeln!(f, "Telegram mode: {}", self.transport)
    }
}

/// Append a line to a log buffer, terminating it with a newline.
pub fn push_log_line(logs: &mut String, line: &str) {
    logs.push_str(line);
    if !line.ends_with('\n') {
        logs.push('\n');
    }
}
