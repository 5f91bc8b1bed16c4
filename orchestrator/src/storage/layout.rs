//! Per-tenant storage layout

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Name of the runtime config document inside a tenant directory
pub const TENANT_CONFIG_FILE: &str = "openclaw.json";

/// Storage layout for tenant runtime directories
#[derive(Debug, Clone)]
pub struct TenantLayout {
    /// Directory holding one subdirectory per tenant
    pub root: PathBuf,
}

impl TenantLayout {
    /// Create a new layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory mounted into the tenant's container
    pub fn tenant_dir(&self, tenant_id: &str) -> Dir {
        Dir::new(self.root.join(tenant_id))
    }

    /// Runtime config document for a tenant
    pub fn config_file(&self, tenant_id: &str) -> File {
        self.tenant_dir(tenant_id).file(TENANT_CONFIG_FILE)
    }

    /// Absolute form of the tenant directory, as required for bind mounts
    pub fn mount_source(&self, tenant_id: &str) -> PathBuf {
        let dir = self.root.join(tenant_id);
        if dir.is_absolute() {
            return dir;
        }
        std::env::current_dir()
            .map(|cwd| cwd.join(&dir))
            .unwrap_or(dir)
    }
}
