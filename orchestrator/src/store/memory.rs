//! In-process store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::errors::DeployError;
use crate::models::deployment::{push_log_line, Deployment, DeploymentStatus};
use crate::models::job::{DeploymentJob, JobStatus};
use crate::models::tenant::Tenant;
use crate::store::Store;

#[derive(Default)]
struct Tables {
    tenants: HashMap<String, Tenant>,
    deployments: HashMap<String, (u64, Deployment)>,
    /// Jobs keyed by id, with their insertion sequence
    jobs: HashMap<String, (u64, DeploymentJob)>,
    next_seq: u64,
}

impl Tables {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Store backed by in-memory tables behind a single lock
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), DeployError> {
        let mut tables = self.tables.lock().await;
        if tables.tenants.contains_key(&tenant.id) {
            return Err(DeployError::ValidationError(format!("Tenant {} already exists", tenant.id)));
        }
        tables.tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(())
    }

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>, DeployError> {
        Ok(self.tables.lock().await.tenants.get(id).cloned())
    }

    async fn save_tenant(&self, tenant: &Tenant) -> Result<(), DeployError> {
        let mut tables = self.tables.lock().await;
        match tables.tenants.get_mut(&tenant.id) {
            Some(stored) => {
                *stored = tenant.clone();
                Ok(())
            }
            None => Err(DeployError::NotFound(format!("Tenant {}", tenant.id))),
        }
    }

    async fn delete_tenant(&self, id: &str) -> Result<bool, DeployError> {
        let mut tables = self.tables.lock().await;
        if tables.tenants.remove(id).is_none() {
            return Ok(false);
        }
        tables.deployments.retain(|_, (_, d)| d.tenant_id != id);
        tables.jobs.retain(|_, (_, j)| j.tenant_id != id);
        Ok(true)
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> Result<(), DeployError> {
        let mut tables = self.tables.lock().await;
        let seq = tables.next_seq();
        tables
            .deployments
            .insert(deployment.id.clone(), (seq, deployment.clone()));
        Ok(())
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, DeployError> {
        Ok(self
            .tables
            .lock()
            .await
            .deployments
            .get(id)
            .map(|(_, d)| d.clone()))
    }

    async fn set_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> Result<(), DeployError> {
        let mut tables = self.tables.lock().await;
        if let Some((_, deployment)) = tables.deployments.get_mut(id) {
            deployment.status = status;
            if let Some(error) = error {
                deployment.error = Some(error.to_string());
            }
        }
        Ok(())
    }

    async fn append_deployment_log(&self, id: &str, line: &str) -> Result<(), DeployError> {
        let mut tables = self.tables.lock().await;
        if let Some((_, deployment)) = tables.deployments.get_mut(id) {
            push_log_line(&mut deployment.logs, line);
        }
        Ok(())
    }

    async fn insert_job(&self, job: &DeploymentJob) -> Result<(), DeployError> {
        let mut tables = self.tables.lock().await;
        let seq = tables.next_seq();
        tables.jobs.insert(job.id.clone(), (seq, job.clone()));
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<DeploymentJob>, DeployError> {
        Ok(self.tables.lock().await.jobs.get(id).map(|(_, j)| j.clone()))
    }

    async fn oldest_queued_job(&self) -> Result<Option<DeploymentJob>, DeployError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .values()
            .filter(|(_, job)| job.status == JobStatus::Queued)
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, job)| job.clone()))
    }

    async fn try_claim_job(&self, id: &str, started_at: DateTime<Utc>) -> Result<bool, DeployError> {
        let mut tables = self.tables.lock().await;
        match tables.jobs.get_mut(id) {
            Some((_, job)) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Running;
                job.attempt += 1;
                job.started_at = Some(started_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_job_log(&self, id: &str, line: &str) -> Result<(), DeployError> {
        let mut tables = self.tables.lock().await;
        if let Some((_, job)) = tables.jobs.get_mut(id) {
            push_log_line(&mut job.logs, line);
        }
        Ok(())
    }

    async fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DeployError> {
        let mut tables = self.tables.lock().await;
        let (_, job) = tables
            .jobs
            .get_mut(id)
            .ok_or_else(|| DeployError::NotFound(format!("Job {}", id)))?;
        job.status = status;
        job.error = error.map(str::to_string);
        job.finished_at = Some(finished_at);
        Ok(())
    }

    async fn tenant_jobs(&self, tenant_id: &str) -> Result<Vec<DeploymentJob>, DeployError> {
        let tables = self.tables.lock().await;
        let mut jobs: Vec<_> = tables
            .jobs
            .values()
            .filter(|(_, job)| job.tenant_id == tenant_id)
            .collect();
        jobs.sort_by_key(|(seq, _)| std::cmp::Reverse(*seq));
        Ok(jobs.into_iter().map(|(_, job)| job.clone()).collect())
    }

    async fn tenant_deployments(&self, tenant_id: &str) -> Result<Vec<Deployment>, DeployError> {
        let tables = self.tables.lock().await;
        let mut deployments: Vec<_> = tables
            .deployments
            .values()
            .filter(|(_, d)| d.tenant_id == tenant_id)
            .collect();
        deployments.sort_by_key(|(seq, _)| std::cmp::Reverse(*seq));
        Ok(deployments.into_iter().map(|(_, d)| d.clone()).collect())
    }
}
