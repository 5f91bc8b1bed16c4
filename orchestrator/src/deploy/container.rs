//! Tenant container lifecycle

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::deploy::OrchestratorOptions;
use crate::errors::DeployError;
use crate::redact::redact;
use crate::runtime::{ContainerRuntime, RunSpec};
use crate::storage::layout::TenantLayout;
use crate::utils::BestEffort;

/// Prefix shared by every tenant container name
pub const CONTAINER_PREFIX: &str = "sc-";

/// Maximum characters of the tenant id kept in a container name
const NAME_ID_LEN: usize = 24;

/// Container name for a tenant: prefix plus the lowercased alphanumerics of
/// the tenant id, truncated.
pub fn container_name(tenant_id: &str) -> String {
    let cleaned: String = tenant_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .take(NAME_ID_LEN)
        .collect();
    format!("{}{}", CONTAINER_PREFIX, cleaned)
}

/// Settings used when launching tenant containers
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    pub network: String,
    pub image: String,
    pub internal_port: u16,
    pub mount_target: String,
    pub settle: Duration,
    pub log_tail: usize,
}

impl From<&OrchestratorOptions> for ContainerOptions {
    fn from(options: &OrchestratorOptions) -> Self {
        Self {
            network: options.network.clone(),
            image: options.image.clone(),
            internal_port: options.internal_port,
            mount_target: options.container_config_dir.clone(),
            settle: options.settle,
            log_tail: options.log_tail,
        }
    }
}

/// Starts, verifies and stops tenant containers
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    layout: TenantLayout,
    options: ContainerOptions,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, layout: TenantLayout, options: ContainerOptions) -> Self {
        Self {
            runtime,
            layout,
            options,
        }
    }

    async fn ensure_network(&self) -> Result<(), DeployError> {
        let network = &self.options.network;
        if self.runtime.network_exists(network).await? {
            return Ok(());
        }
        info!(network = %network, "Creating tenant network");
        self.runtime.create_network(network).await
    }

    /// Launch the tenant's container publishing `port` and return its id once
    /// it is observed running.
    pub async fn start(&self, tenant_id: &str, port: u16, name: &str) -> Result<String, DeployError> {
        self.runtime.ping().await.map_err(|e| match e {
            DeployError::RuntimeUnavailable(_) => e,
            other => DeployError::RuntimeUnavailable(other.to_string()),
        })?;
        self.ensure_network().await?;

        // A leftover container with our name would block the run
        if let Err(e) = self.runtime.remove_container(name).await {
            warn!(container = name, "Unable to remove previous container: {}", e);
        }

        let spec = RunSpec {
            name: name.to_string(),
            image: self.options.image.clone(),
            network: self.options.network.clone(),
            host_port: port,
            container_port: self.options.internal_port,
            mount_source: self.layout.mount_source(tenant_id),
            mount_target: self.options.mount_target.clone(),
        };

        let container_id = match self.runtime.run_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                // A failed run can still leave the named container in Created state
                let _ = self.stop_best_effort(name).await.report();

                return Err(if e.is_port_conflict() {
                    DeployError::PortConflict {
                        port,
                        detail: e.to_string(),
                    }
                } else {
                    e
                });
            }
        };
        debug!(container = name, port, "Container launched, waiting to settle");

        tokio::time::sleep(self.options.settle).await;

        let state = self.runtime.container_state(&container_id).await?;
        if !state.running {
            let logs = match self.runtime.container_logs(&container_id, self.options.log_tail).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(container = name, "Unable to read container logs: {}", e);
                    String::new()
                }
            };

            // Do not leave a crash-looping container behind
            let _ = self.stop_best_effort(name).await.report();

            return Err(DeployError::ContainerStart {
                state: redact(&state.to_string()),
                logs: redact(&logs),
            });
        }

        info!(container = name, port, "Container running");
        Ok(container_id)
    }

    /// Remove a container by name. Missing containers are not an error.
    pub async fn stop(&self, name: &str) -> Result<(), DeployError> {
        if name.trim().is_empty() {
            return Ok(());
        }
        self.runtime.remove_container(name).await?;
        info!(container = name, "Container removed");
        Ok(())
    }

    pub async fn stop_best_effort(&self, name: &str) -> BestEffort {
        BestEffort::new("Container removal", self.stop(name).await.map_err(|e| e.to_string()))
    }
}
