//! Provisioning requests that feed the job queue

use std::sync::Arc;

use secrecy::SecretString;
use tracing::info;

use crate::canary::{CredentialCanary, Provider};
use crate::channel::ChannelClient;
use crate::deploy::processor::{Collaborators, JobProcessor};
use crate::deploy::queue::{ClaimOutcome, JobQueue};
use crate::errors::DeployError;
use crate::models::deployment::Deployment;
use crate::models::job::{DeploymentJob, JobPayload};
use crate::models::tenant::{
    is_valid_tenant_id, RuntimeStatus, Tenant, TenantStatus, DEFAULT_CHANNEL, DEFAULT_MODEL,
};
use crate::redact::redact;
use crate::store::Store;
use crate::utils::BestEffort;

/// Largest batch a single tick may drain
pub const MAX_TICK_LIMIT: usize = 20;

/// Clamp a requested batch size to `1..=MAX_TICK_LIMIT`; missing means 1.
pub fn clamp_limit(limit: Option<i64>) -> usize {
    limit.unwrap_or(1).clamp(1, MAX_TICK_LIMIT as i64) as usize
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Deploy request for an existing tenant
#[derive(Default)]
pub struct DeployRequest {
    pub tenant_id: String,
    pub model: Option<String>,
    pub channel: Option<String>,
    pub api_key: Option<String>,
}

/// What [`Provisioner::request_deploy`] queued
#[derive(Debug)]
pub struct QueuedDeploy {
    pub deployment: Deployment,
    pub job: DeploymentJob,
}

/// Changes to a tenant's runtime settings. `None` leaves a field as it is;
/// an empty `api_key` clears the stored key.
#[derive(Default)]
pub struct TenantUpdate {
    pub model: Option<String>,
    pub channel: Option<String>,
    pub api_key: Option<String>,
}

/// What [`Provisioner::delete_tenant`] did besides removing the tenant
#[derive(Debug, Default)]
pub struct TenantDeletion {
    /// A running container was stopped first
    pub stopped_runtime: bool,
    /// Best-effort steps that failed
    pub warnings: Vec<String>,
}

/// Creates, updates and deletes tenants and queues their deploy/stop work
pub struct Provisioner {
    store: Arc<dyn Store>,
    queue: JobQueue,
    canary: Arc<dyn CredentialCanary>,
    channel: Arc<dyn ChannelClient>,
    processor: Arc<JobProcessor>,
}

impl Provisioner {
    pub fn new(deps: Collaborators, processor: Arc<JobProcessor>) -> Self {
        Self {
            queue: JobQueue::new(deps.store.clone()),
            store: deps.store,
            canary: deps.canary,
            channel: deps.channel,
            processor,
        }
    }

    async fn load_tenant(&self, tenant_id: &str) -> Result<Tenant, DeployError> {
        self.store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("Tenant {}", tenant_id)))
    }

    /// Reject a key the model's provider does not accept
    async fn admit_key(&self, model: &str, api_key: &str) -> Result<(), DeployError> {
        if let Some(provider) = Provider::from_model(model) {
            let key = SecretString::from(api_key.to_string());
            self.canary
                .test_key(provider, &key)
                .await
                .map_err(DeployError::KeyRejected)?;
        }
        Ok(())
    }

    /// Test a key against a provider named by its model key
    /// (`gemini`, `gpt` or `claude`) without touching any tenant.
    pub async fn test_key(&self, provider: &str, api_key: &str) -> Result<String, DeployError> {
        let provider = Provider::from_key(provider.trim()).ok_or_else(|| {
            DeployError::ValidationError("Invalid provider. Use gemini, gpt, or claude.".to_string())
        })?;
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(DeployError::ValidationError("API key is required.".to_string()));
        }

        self.canary
            .test_key(provider, &SecretString::from(api_key.to_string()))
            .await
            .map_err(DeployError::KeyRejected)
    }

    /// Register a new tenant in PENDING state
    pub async fn register_tenant(
        &self,
        tenant_id: &str,
        bot_token: &str,
        model: Option<&str>,
        channel: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<Tenant, DeployError> {
        let tenant_id = tenant_id.trim();
        if tenant_id.is_empty() {
            return Err(DeployError::ValidationError("Tenant id required".to_string()));
        }
        if !is_valid_tenant_id(tenant_id) {
            return Err(DeployError::ValidationError(
                "Tenant id may only contain letters, digits, '-' and '_'".to_string(),
            ));
        }
        if !bot_token.contains(':') {
            return Err(DeployError::ValidationError("Invalid bot token format".to_string()));
        }

        let model = non_empty(model).unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_key = non_empty(api_key);
        if let Some(key) = &api_key {
            self.admit_key(&model, key).await?;
        }

        let mut tenant = Tenant::new(tenant_id, bot_token.trim());
        tenant.model = Some(model);
        tenant.channel = Some(non_empty(channel).unwrap_or_else(|| DEFAULT_CHANNEL.to_string()));
        tenant.api_key = api_key;

        self.store.insert_tenant(&tenant).await?;
        info!(tenant_id = %tenant.id, "Tenant registered");
        Ok(tenant)
    }

    /// Change a tenant's model, channel or key. A new key is tested against
    /// the provider of the resulting model before anything is saved.
    pub async fn update_tenant(&self, tenant_id: &str, update: TenantUpdate) -> Result<Tenant, DeployError> {
        let mut tenant = self.load_tenant(tenant_id).await?;

        let model = non_empty(update.model.as_deref());
        if let Some(api_key) = update.api_key.as_deref() {
            let api_key = non_empty(Some(api_key));
            if let Some(key) = &api_key {
                let target_model = model
                    .clone()
                    .or_else(|| non_empty(tenant.model.as_deref()))
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string());
                self.admit_key(&target_model, key).await?;
            }
            tenant.api_key = api_key;
        }
        if let Some(model) = model {
            tenant.model = Some(model);
        }
        if let Some(channel) = non_empty(update.channel.as_deref()) {
            tenant.channel = Some(channel);
        }

        self.store.save_tenant(&tenant).await?;
        info!(tenant_id = %tenant.id, "Tenant updated");
        Ok(tenant)
    }

    /// Delete a tenant, stopping its runtime first.
    ///
    /// Stopping the container and clearing the channel webhook are best
    /// effort: their failures are reported in the result and never keep the
    /// tenant from being removed.
    pub async fn delete_tenant(&self, tenant_id: &str) -> Result<TenantDeletion, DeployError> {
        let tenant = self.load_tenant(tenant_id).await?;
        let mut deletion = TenantDeletion::default();

        if tenant.container_name.as_deref().is_some_and(|n| !n.is_empty()) {
            let stop = BestEffort::new(
                "Runtime stop",
                self.stop_now(&tenant.id).await.map_err(|e| redact(&e.to_string())),
            );
            deletion.stopped_runtime = stop.is_ok();
            deletion.warnings.extend(stop.report());
        }
        deletion
            .warnings
            .extend(self.channel.clear_webhook(&tenant.token).await.report());

        self.store.delete_tenant(&tenant.id).await?;
        info!(tenant_id = %tenant.id, warnings = deletion.warnings.len(), "Tenant deleted");
        Ok(deletion)
    }

    /// Queue a stop and run it right away unless a worker claims it first
    async fn stop_now(&self, tenant_id: &str) -> Result<(), DeployError> {
        let job = self.request_stop(tenant_id).await?;
        match self.queue.claim(job).await? {
            ClaimOutcome::Claimed(job) => self.processor.process_claimed(&job).await,
            ClaimOutcome::Raced | ClaimOutcome::Empty => Ok(()),
        }
    }

    /// Validate the tenant's credential and queue a deploy.
    pub async fn request_deploy(&self, request: DeployRequest) -> Result<QueuedDeploy, DeployError> {
        let mut tenant = self.load_tenant(&request.tenant_id).await?;

        let model = non_empty(request.model.as_deref())
            .or_else(|| non_empty(tenant.model.as_deref()))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let channel = non_empty(request.channel.as_deref())
            .or_else(|| non_empty(tenant.channel.as_deref()))
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
        let api_key = non_empty(request.api_key.as_deref()).or_else(|| non_empty(tenant.api_key.as_deref()));

        if let Some(provider) = Provider::from_model(&model) {
            let Some(key) = &api_key else {
                return Err(DeployError::ValidationError(format!(
                    "{} model requires an API key",
                    provider
                )));
            };
            self.admit_key(&model, key).await?;
        }

        let deployment = Deployment::new(&tenant.id);
        self.store.insert_deployment(&deployment).await?;

        tenant.set_status(TenantStatus::Deploying, RuntimeStatus::Queued);
        tenant.model = Some(model.clone());
        tenant.channel = Some(channel.clone());
        self.store.save_tenant(&tenant).await?;

        let payload = JobPayload {
            deployment_id: Some(deployment.id.clone()),
            model: Some(model),
            channel: Some(channel),
            api_key,
        };
        let job = self.queue.enqueue_deploy(&tenant.id, &payload).await?;

        Ok(QueuedDeploy { deployment, job })
    }

    /// Queue a stop for a tenant's runtime
    pub async fn request_stop(&self, tenant_id: &str) -> Result<DeploymentJob, DeployError> {
        let mut tenant = self.load_tenant(tenant_id).await?;

        tenant.set_status(TenantStatus::Deploying, RuntimeStatus::Stopping);
        self.store.save_tenant(&tenant).await?;

        self.queue.enqueue_stop(&tenant.id).await
    }
}
