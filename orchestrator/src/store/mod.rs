//! Persistence seam for tenants, deployments and deployment jobs
//!
//! The orchestrator only needs a handful of entity transitions, so the trait
//! names them directly instead of exposing a general query API. The one
//! concurrency-sensitive operation is [`Store::try_claim_job`], which must be a
//! single conditional write: `QUEUED -> RUNNING` only if the row is still
//! `QUEUED` at write time.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::DeployError;
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::models::job::{DeploymentJob, JobStatus};
use crate::models::tenant::Tenant;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), DeployError>;

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>, DeployError>;

    /// Replace the stored tenant with `tenant`. Fails if it does not exist.
    async fn save_tenant(&self, tenant: &Tenant) -> Result<(), DeployError>;

    /// Remove a tenant with its deployments and jobs. Returns false when
    /// there was no such tenant.
    async fn delete_tenant(&self, id: &str) -> Result<bool, DeployError>;

    async fn insert_deployment(&self, deployment: &Deployment) -> Result<(), DeployError>;

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, DeployError>;

    /// Set status and error. Unknown ids are ignored.
    async fn set_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> Result<(), DeployError>;

    /// Append a newline-terminated line. Unknown ids are ignored.
    async fn append_deployment_log(&self, id: &str, line: &str) -> Result<(), DeployError>;

    async fn insert_job(&self, job: &DeploymentJob) -> Result<(), DeployError>;

    async fn get_job(&self, id: &str) -> Result<Option<DeploymentJob>, DeployError>;

    /// The queued job with the earliest creation order
    async fn oldest_queued_job(&self) -> Result<Option<DeploymentJob>, DeployError>;

    /// Atomically move a job from QUEUED to RUNNING, bumping `attempt` and
    /// stamping `started_at`. Returns false when the job was not QUEUED.
    async fn try_claim_job(&self, id: &str, started_at: DateTime<Utc>) -> Result<bool, DeployError>;

    /// Append a newline-terminated line. Unknown ids are ignored.
    async fn append_job_log(&self, id: &str, line: &str) -> Result<(), DeployError>;

    /// Record the terminal status of a running job.
    async fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DeployError>;

    /// Jobs for a tenant, newest first
    async fn tenant_jobs(&self, tenant_id: &str) -> Result<Vec<DeploymentJob>, DeployError>;

    /// Deployments for a tenant, newest first
    async fn tenant_deployments(&self, tenant_id: &str) -> Result<Vec<Deployment>, DeployError>;
}
