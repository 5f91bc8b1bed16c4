//! Tenant deployment orchestration

pub mod container;
pub mod ports;
pub mod processor;
pub mod queue;
pub mod requests;
pub mod tenant_config;

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::ports::PortRange;
use crate::storage::settings::{ModelSettings, Settings};

pub use container::{container_name, ContainerManager};
pub use ports::{PortAllocator, PortProbe, TcpProbe};
pub use processor::JobProcessor;
pub use queue::{ClaimOutcome, JobQueue};
pub use tenant_config::TenantConfigWriter;

/// Everything the orchestrator needs to know about its environment,
/// resolved once at startup.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Container runtime CLI binary
    pub docker_bin: String,
    pub network: String,
    pub image: String,
    pub tenant_root: PathBuf,
    pub internal_port: u16,
    pub container_config_dir: String,
    pub port_range: PortRange,
    pub settle: Duration,
    pub log_tail: usize,
    /// Total container start attempts when ports collide
    pub start_attempts: u32,
    pub models: ModelSettings,
}

impl OrchestratorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let runtime = &settings.runtime;
        Self {
            docker_bin: runtime.docker_bin.clone(),
            network: runtime.network.clone(),
            image: runtime.image.clone(),
            tenant_root: runtime.tenant_root.clone(),
            internal_port: runtime.internal_port,
            container_config_dir: runtime.container_config_dir.clone(),
            port_range: PortRange {
                start: runtime.port_range_start,
                end: runtime.port_range_end,
            },
            settle: Duration::from_millis(runtime.settle_ms),
            log_tail: runtime.log_tail,
            start_attempts: runtime.start_attempts.max(1),
            models: settings.models.clone(),
        }
    }
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}
