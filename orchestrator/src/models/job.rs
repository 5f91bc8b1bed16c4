//! Deployment job models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::status_enum;

status_enum! {
    /// Kind of queued work
    JobType {
        Deploy => "DEPLOY",
        Stop => "STOP",
    }
}

status_enum! {
    /// Queue status of a job
    JobStatus {
        Queued => "QUEUED",
        Running => "RUNNING",
        Success => "SUCCESS",
        Failed => "FAILED",
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

/// A unit of queued deploy/stop work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentJob {
    /// Unique job ID
    pub id: String,

    /// Owning tenant
    pub tenant_id: String,

    #[serde(rename = "type")]
    pub job_type: JobType,

    pub status: JobStatus,

    /// Serialized [`JobPayload`]; kept opaque so malformed rows still load
    pub payload: Option<String>,

    /// Number of times the job has been claimed
    pub attempt: u32,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Append-only log text
    pub logs: String,

    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl DeploymentJob {
    /// Create a queued job
    pub fn new(job_type: JobType, tenant_id: impl Into<String>, payload: &JobPayload) -> Self {
        let logs = match job_type {
            JobType::Deploy => "Queued deployment job\n",
            JobType::Stop => "Queued stop job\n",
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            job_type,
            status: JobStatus::Queued,
            payload: serde_json::to_string(payload).ok(),
            attempt: 0,
            started_at: None,
            finished_at: None,
            logs: logs.to_string(),
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Decoded payload; malformed or missing payloads decode to the empty payload
    pub fn payload(&self) -> JobPayload {
        JobPayload::parse(self.payload.as_deref())
    }
}

/// Parameters carried by a job
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl JobPayload {
    /// Decode a stored payload, degrading to the empty payload on any problem
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return Self::default();
        };

        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value @ serde_json::Value::Object(_)) => {
                serde_json::from_value(value).unwrap_or_default()
            }
            _ => Self::default(),
        }
    }
}

impl std::fmt::Debug for JobPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPayload")
            .field("deployment_id", &self.deployment_id)
            .field("model", &self.model)
            .field("channel", &self.channel)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}
