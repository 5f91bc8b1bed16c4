//! Persisted FIFO of deploy and stop jobs

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::models::job::{DeploymentJob, JobPayload, JobStatus, JobType};
use crate::store::Store;

/// Result of one claim attempt
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The job is now RUNNING and owned by the caller
    Claimed(DeploymentJob),
    /// Another claimer moved the queue head first
    Raced,
    /// No job is queued
    Empty,
}

/// Job queue over a [`Store`]
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn Store>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append a QUEUED job
    pub async fn enqueue(
        &self,
        job_type: JobType,
        tenant_id: &str,
        payload: &JobPayload,
    ) -> Result<DeploymentJob, DeployError> {
        let job = DeploymentJob::new(job_type, tenant_id, payload);
        self.store.insert_job(&job).await?;
        info!(job_id = %job.id, tenant_id, job_type = %job_type, "Job queued");
        Ok(job)
    }

    pub async fn enqueue_deploy(
        &self,
        tenant_id: &str,
        payload: &JobPayload,
    ) -> Result<DeploymentJob, DeployError> {
        self.enqueue(JobType::Deploy, tenant_id, payload).await
    }

    pub async fn enqueue_stop(&self, tenant_id: &str) -> Result<DeploymentJob, DeployError> {
        self.enqueue(JobType::Stop, tenant_id, &JobPayload::default()).await
    }

    /// Try to claim the oldest queued job.
    ///
    /// A lost race is reported as [`ClaimOutcome::Raced`] and is not retried here.
    pub async fn claim_next(&self) -> Result<ClaimOutcome, DeployError> {
        match self.store.oldest_queued_job().await? {
            Some(job) => self.claim(job).await,
            None => Ok(ClaimOutcome::Empty),
        }
    }

    /// Try to claim a specific queued job
    pub async fn claim(&self, mut job: DeploymentJob) -> Result<ClaimOutcome, DeployError> {
        let started_at = Utc::now();
        if !self.store.try_claim_job(&job.id, started_at).await? {
            debug!(job_id = %job.id, "Job claimed by another worker");
            return Ok(ClaimOutcome::Raced);
        }

        job.status = JobStatus::Running;
        job.attempt += 1;
        job.started_at = Some(started_at);
        Ok(ClaimOutcome::Claimed(job))
    }
}
