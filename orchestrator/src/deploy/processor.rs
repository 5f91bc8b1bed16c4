//! Job processing
//!
//! Claims jobs one at a time and drives each through the deploy or stop path.
//! Every failure is recorded on the job, its deployment and its tenant before
//! it is handed back to the batch loop, which logs it and moves on.

use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;
use tracing::{error, info, warn};

use crate::canary::{run_canary, CredentialCanary};
use crate::channel::ChannelClient;
use crate::deploy::container::{container_name, ContainerManager};
use crate::deploy::ports::{PortAllocator, PortProbe};
use crate::deploy::queue::{ClaimOutcome, JobQueue};
use crate::deploy::tenant_config::{TenantConfigParams, TenantConfigWriter};
use crate::deploy::OrchestratorOptions;
use crate::errors::DeployError;
use crate::models::deployment::{DeploymentStatus, DeploymentSummary};
use crate::models::job::{DeploymentJob, JobPayload, JobStatus, JobType};
use crate::models::tenant::{RuntimeStatus, Tenant, TenantStatus, DEFAULT_CHANNEL, DEFAULT_MODEL};
use crate::redact::redact;
use crate::runtime::ContainerRuntime;
use crate::storage::layout::TenantLayout;
use crate::store::Store;
use crate::utils::generate_gateway_token;

/// Transport the runtime uses for the inbound channel
const TELEGRAM_TRANSPORT: &str = "long-polling";

/// External systems the processor drives
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub probe: Arc<dyn PortProbe>,
    pub canary: Arc<dyn CredentialCanary>,
    pub channel: Arc<dyn ChannelClient>,
}

/// Parameters of a deploy job after falling back to the tenant's stored values
struct ResolvedDeploy {
    deployment_id: Option<String>,
    model: String,
    model_id: String,
    channel: String,
    api_key: Option<String>,
}

/// A container observed running, not yet recorded on its tenant
struct StartedContainer {
    name: String,
    id: String,
    port: u16,
    gateway_token: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub struct JobProcessor {
    store: Arc<dyn Store>,
    queue: JobQueue,
    ports: PortAllocator,
    configs: TenantConfigWriter,
    containers: ContainerManager,
    canary: Arc<dyn CredentialCanary>,
    channel: Arc<dyn ChannelClient>,
    options: OrchestratorOptions,
}

impl JobProcessor {
    pub fn new(deps: Collaborators, options: OrchestratorOptions) -> Self {
        let layout = TenantLayout::new(options.tenant_root.clone());
        Self {
            queue: JobQueue::new(deps.store.clone()),
            ports: PortAllocator::new(deps.runtime.clone(), deps.probe, options.port_range),
            configs: TenantConfigWriter::new(layout.clone(), options.internal_port),
            containers: ContainerManager::new(deps.runtime, layout, (&options).into()),
            store: deps.store,
            canary: deps.canary,
            channel: deps.channel,
            options,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Claim and process up to `max_jobs` jobs, one at a time.
    ///
    /// Returns the ids of every job claimed, whether it succeeded or failed.
    /// Only a failure to read the queue itself is returned as an error.
    pub async fn process_queue(&self, max_jobs: usize) -> Result<Vec<String>, DeployError> {
        let mut processed = Vec::new();

        for _ in 0..max_jobs {
            let job = match self.queue.claim_next().await? {
                ClaimOutcome::Claimed(job) => job,
                // Next iteration looks at the new queue head
                ClaimOutcome::Raced => continue,
                ClaimOutcome::Empty => break,
            };

            processed.push(job.id.clone());
            info!(job_id = %job.id, tenant_id = %job.tenant_id, job_type = %job.job_type, "Processing job");

            if let Err(e) = self.process_claimed(&job).await {
                error!(job_id = %job.id, "Deployment job failed: {}", redact(&e.to_string()));
            }
        }

        Ok(processed)
    }

    /// Run a claimed job to a terminal state
    pub async fn process_claimed(&self, job: &DeploymentJob) -> Result<(), DeployError> {
        let payload = job.payload();

        let result = match job.job_type {
            JobType::Deploy => self.deploy(job, &payload).await,
            JobType::Stop => self.stop(job).await,
        };

        if let Err(e) = &result {
            if let Err(record_err) = self.fail_job(job, payload.deployment_id.as_deref(), e).await {
                error!(job_id = %job.id, "Unable to record job failure: {}", record_err);
            }
        }
        result
    }

    async fn load_tenant(&self, tenant_id: &str) -> Result<Tenant, DeployError> {
        self.store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("Tenant {}", tenant_id)))
    }

    async fn job_log(&self, job_id: &str, line: &str) -> Result<(), DeployError> {
        self.store.append_job_log(job_id, &redact(line)).await
    }

    async fn deployment_log(&self, deployment_id: Option<&str>, line: &str) -> Result<(), DeployError> {
        match deployment_id {
            Some(id) => self.store.append_deployment_log(id, &redact(line)).await,
            None => Ok(()),
        }
    }

    fn resolve(&self, payload: &JobPayload, tenant: &Tenant) -> ResolvedDeploy {
        let model = non_empty(payload.model.clone())
            .or_else(|| non_empty(tenant.model.clone()))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let channel = non_empty(payload.channel.clone())
            .or_else(|| non_empty(tenant.channel.clone()))
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
        let api_key = non_empty(payload.api_key.clone()).or_else(|| non_empty(tenant.api_key.clone()));

        ResolvedDeploy {
            deployment_id: payload.deployment_id.clone(),
            model_id: self.options.models.resolve(&model),
            model,
            channel,
            api_key,
        }
    }

    // ================================ DEPLOY ================================== //

    async fn deploy(&self, job: &DeploymentJob, payload: &JobPayload) -> Result<(), DeployError> {
        let mut tenant = self.load_tenant(&job.tenant_id).await?;
        let resolved = self.resolve(payload, &tenant);
        let deployment_id = resolved.deployment_id.as_deref();

        if let Some(id) = deployment_id {
            self.store
                .set_deployment_status(id, DeploymentStatus::InProgress, None)
                .await?;
        }

        self.job_log(&job.id, &format!("Deploying tenant {}", tenant.id)).await?;
        self.job_log(&job.id, &format!("Model resolved to {}", resolved.model_id))
            .await?;
        let key_line = match resolved.api_key {
            Some(_) => "Using per-tenant API key",
            None => "No API key provided for deployment",
        };
        self.job_log(&job.id, key_line).await?;
        self.deployment_log(deployment_id, "Starting deployment worker...").await?;

        if let Some(line) = self.channel.clear_webhook(&tenant.token).await.report() {
            self.job_log(&job.id, &line).await?;
        }

        // Free the previous container's port so it can be reused
        if let Some(previous) = tenant.container_name.clone().filter(|n| !n.is_empty()) {
            self.job_log(&job.id, &format!("Removing previous container {}", previous))
                .await?;
            if let Some(line) = self.containers.stop_best_effort(&previous).await.report() {
                self.job_log(&job.id, &line).await?;
            }
        }

        let name = container_name(&tenant.id);
        let mut port = self.ports.allocate(tenant.runtime_port).await?;
        let gateway_token = generate_gateway_token();

        self.configs
            .write(&TenantConfigParams {
                tenant_id: &tenant.id,
                bot_token: &tenant.token,
                model: &resolved.model,
                model_id: &resolved.model_id,
                api_key: resolved.api_key.as_deref(),
                gateway_token: &gateway_token,
            })
            .await?;

        let container_id = self.start_with_retry(job, &tenant.id, &name, &mut port).await?;

        let started = StartedContainer {
            name,
            id: container_id,
            port,
            gateway_token,
        };
        if let Err(e) = self.go_live(job, &mut tenant, &resolved, &started).await {
            // No container may outlive a failed deploy
            if let Some(line) = self.containers.stop_best_effort(&started.name).await.report() {
                if let Err(log_err) = self.job_log(&job.id, &line).await {
                    warn!(job_id = %job.id, "Unable to log container removal: {}", log_err);
                }
            }
            return Err(e);
        }

        info!(job_id = %job.id, tenant_id = %tenant.id, container = %started.name, port, "Tenant is live");
        Ok(())
    }

    /// Gate a running container on the runtime canary and record it as live.
    /// Any error leaves the container for the caller to remove.
    async fn go_live(
        &self,
        job: &DeploymentJob,
        tenant: &mut Tenant,
        resolved: &ResolvedDeploy,
        started: &StartedContainer,
    ) -> Result<(), DeployError> {
        let deployment_id = resolved.deployment_id.as_deref();

        self.job_log(&job.id, "Running provider runtime canary...").await?;
        let api_key = resolved.api_key.clone().map(SecretString::from);
        let message = match run_canary(self.canary.as_ref(), &resolved.model, api_key.as_ref()).await {
            Ok(message) => message,
            Err(failure) => {
                let line = format!("Runtime canary failed: {}", failure);
                self.job_log(&job.id, &line).await?;
                self.deployment_log(deployment_id, &line).await?;
                return Err(failure.into());
            }
        };

        let line = format!("Runtime canary passed: {}", message);
        self.job_log(&job.id, &line).await?;
        self.deployment_log(deployment_id, &line).await?;

        tenant.set_status(TenantStatus::Live, RuntimeStatus::Live);
        tenant.container_name = Some(started.name.clone());
        tenant.container_id = Some(started.id.clone());
        tenant.runtime_port = Some(started.port);
        tenant.webhook_secret = Some(started.gateway_token.clone());
        tenant.webhook_url = None;
        tenant.last_heartbeat_at = Some(Utc::now());
        tenant.model = Some(resolved.model.clone());
        tenant.channel = Some(resolved.channel.clone());
        self.store.save_tenant(tenant).await?;

        if let Some(id) = deployment_id {
            let summary = DeploymentSummary {
                container_name: started.name.clone(),
                port: started.port,
                model_id: resolved.model_id.clone(),
                transport: TELEGRAM_TRANSPORT.to_string(),
            };
            self.store.append_deployment_log(id, &summary.to_string()).await?;
            self.store
                .set_deployment_status(id, DeploymentStatus::Success, None)
                .await?;
        }

        let short_id: String = started.id.chars().take(12).collect();
        self.job_log(&job.id, &format!("Container started: {} ({})", started.name, short_id))
            .await?;
        self.job_log(&job.id, "Deployment completed").await?;
        self.store
            .finish_job(&job.id, JobStatus::Success, None, Utc::now())
            .await
    }

    /// Start the container, moving to a freshly allocated port whenever the
    /// current one turns out to be taken.
    async fn start_with_retry(
        &self,
        job: &DeploymentJob,
        tenant_id: &str,
        name: &str,
        port: &mut u16,
    ) -> Result<String, DeployError> {
        let attempts = self.options.start_attempts.max(1);

        for attempt in 1..=attempts {
            match self.containers.start(tenant_id, *port, name).await {
                Ok(container_id) => return Ok(container_id),
                Err(e) if e.is_port_conflict() && attempt < attempts => {
                    warn!(job_id = %job.id, port = *port, attempt, "Port conflict on container start");
                    self.job_log(
                        &job.id,
                        &format!("Port {} was allocated concurrently. Retrying with a new port...", port),
                    )
                    .await?;
                    *port = self.ports.allocate(None).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Err(DeployError::Internal("container start attempts exhausted".to_string()))
    }

    // ================================= STOP =================================== //

    async fn stop(&self, job: &DeploymentJob) -> Result<(), DeployError> {
        let mut tenant = self.load_tenant(&job.tenant_id).await?;
        self.job_log(&job.id, &format!("Stopping runtime for {}", tenant.id))
            .await?;

        if let Some(name) = tenant.container_name.clone().filter(|n| !n.is_empty()) {
            self.containers.stop(&name).await?;
        }

        tenant.clear_runtime();
        tenant.set_status(TenantStatus::Stopped, RuntimeStatus::Stopped);
        self.store.save_tenant(&tenant).await?;

        self.job_log(&job.id, "Runtime stopped").await?;
        self.store
            .finish_job(&job.id, JobStatus::Success, None, Utc::now())
            .await?;

        info!(job_id = %job.id, tenant_id = %tenant.id, "Tenant runtime stopped");
        Ok(())
    }

    // ================================ FAILURE ================================= //

    /// Record a failure on the job, its deployment and its tenant.
    ///
    /// Each write is attempted even when an earlier one fails, so a store
    /// hiccup on one entity does not leave the others mid-flight. The first
    /// error is returned.
    async fn fail_job(
        &self,
        job: &DeploymentJob,
        deployment_id: Option<&str>,
        err: &DeployError,
    ) -> Result<(), DeployError> {
        let message = redact(&err.to_string());
        let line = format!("FAILED: {}", message);
        let mut first_err = None;
        let mut note = |step: &str, result: Result<(), DeployError>| {
            if let Err(e) = result {
                error!(job_id = %job.id, step, "Unable to record failure: {}", e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        };

        note("job log", self.store.append_job_log(&job.id, &line).await);
        note(
            "job status",
            self.store
                .finish_job(&job.id, JobStatus::Failed, Some(&message), Utc::now())
                .await,
        );

        if let Some(id) = deployment_id {
            note("deployment log", self.store.append_deployment_log(id, &line).await);
            note(
                "deployment status",
                self.store
                    .set_deployment_status(id, DeploymentStatus::Failed, Some(&message))
                    .await,
            );
        }

        match self.store.get_tenant(&job.tenant_id).await {
            Ok(Some(mut tenant)) => {
                tenant.set_status(TenantStatus::Error, RuntimeStatus::Error);
                note("tenant status", self.store.save_tenant(&tenant).await);
            }
            Ok(None) => warn!(job_id = %job.id, tenant_id = %job.tenant_id, "Failed job has no tenant"),
            Err(e) => note("tenant lookup", Err(e)),
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
