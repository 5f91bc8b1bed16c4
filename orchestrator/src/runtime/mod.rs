//! Container runtime command interface

pub mod docker;

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::DeployError;

pub use docker::DockerCli;

/// Everything needed to launch one tenant container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    /// Host port published to `container_port`
    pub host_port: u16,
    pub container_port: u16,
    /// Host directory bind-mounted at `mount_target`
    pub mount_source: PathBuf,
    pub mount_target: String,
}

/// Observed container state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub status: String,
    pub running: bool,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.status, self.running)
    }
}

/// Imperative operations against the container daemon.
///
/// Implementations must redact any secrets out of the errors they return.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lightweight daemon reachability check
    async fn ping(&self) -> Result<(), DeployError>;

    async fn network_exists(&self, name: &str) -> Result<bool, DeployError>;

    async fn create_network(&self, name: &str) -> Result<(), DeployError>;

    /// Host ports published by running containers
    async fn published_host_ports(&self) -> Result<HashSet<u16>, DeployError>;

    /// Force-remove a container by name. Missing containers are not an error.
    async fn remove_container(&self, name: &str) -> Result<(), DeployError>;

    /// Launch a detached container and return its id
    async fn run_container(&self, spec: &RunSpec) -> Result<String, DeployError>;

    async fn container_state(&self, id: &str) -> Result<ContainerState, DeployError>;

    /// Last `tail` lines of a container's output
    async fn container_logs(&self, id: &str, tail: usize) -> Result<String, DeployError>;
}
