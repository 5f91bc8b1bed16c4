//! Host port allocation for tenant runtimes
//!
//! A port is handed out only when the container runtime does not report it as
//! published and a live bind on the wildcard address succeeds. Allocation is
//! advisory: a concurrent deploy can still take the port before the container
//! starts, which the caller handles by retrying.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::redact::redact;
use crate::runtime::ContainerRuntime;

/// OS-level check that a host port can be bound right now
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_bindable(&self, port: u16) -> bool;
}

/// Probe that binds `0.0.0.0:<port>` and immediately releases it
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl PortProbe for TcpProbe {
    async fn is_bindable(&self, port: u16) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(e) => {
                debug!(port, "Port not bindable: {}", e);
                false
            }
        }
    }
}

/// Inclusive range of host ports available to tenants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 19000,
            end: 19999,
        }
    }
}

pub struct PortAllocator {
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn PortProbe>,
    range: PortRange,
}

impl PortAllocator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, probe: Arc<dyn PortProbe>, range: PortRange) -> Self {
        Self { runtime, probe, range }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Ports the runtime reports as published. An unreachable runtime yields
    /// an empty set; the bind check still guards every candidate.
    async fn excluded_ports(&self) -> HashSet<u16> {
        match self.runtime.published_host_ports().await {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Unable to list published ports: {}", redact(&e.to_string()));
                HashSet::new()
            }
        }
    }

    /// Allocate a free host port, trying `preferred` first.
    pub async fn allocate(&self, preferred: Option<u16>) -> Result<u16, DeployError> {
        let excluded = self.excluded_ports().await;

        if let Some(port) = preferred.filter(|p| *p > 0) {
            if !excluded.contains(&port) && self.probe.is_bindable(port).await {
                debug!(port, "Reusing preferred port");
                return Ok(port);
            }
        }

        for port in self.range.start..=self.range.end {
            if excluded.contains(&port) {
                continue;
            }
            if self.probe.is_bindable(port).await {
                debug!(port, "Allocated port");
                return Ok(port);
            }
        }

        Err(DeployError::PortExhaustion {
            start: self.range.start,
            end: self.range.end,
        })
    }
}
