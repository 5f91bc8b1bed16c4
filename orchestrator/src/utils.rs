//! Utility functions

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Version information for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Outcome of an operation whose failure must not fail the caller.
///
/// Callers are expected to [`report`](BestEffort::report) it and move on.
#[must_use = "best-effort outcomes should be reported"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestEffort {
    operation: &'static str,
    outcome: Result<(), String>,
}

impl BestEffort {
    pub fn new(operation: &'static str, outcome: Result<(), String>) -> Self {
        Self { operation, outcome }
    }

    pub fn ok(operation: &'static str) -> Self {
        Self::new(operation, Ok(()))
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<String> {
        self.outcome.as_ref().err().cloned()
    }

    /// Log the outcome and return a one-line description of any failure
    pub fn report(self) -> Option<String> {
        match self.outcome {
            Ok(()) => {
                debug!("{} succeeded", self.operation);
                None
            }
            Err(e) => {
                warn!("{} failed (ignored): {}", self.operation, e);
                Some(format!("{} failed (ignored): {}", self.operation, e))
            }
        }
    }
}

/// Fresh random secret for a tenant's runtime gateway (48 hex chars)
pub fn generate_gateway_token() -> String {
    let bytes: [u8; 24] = rand::random();
    hex::encode(bytes)
}

/// Calculate SHA256 hash of data
pub fn sha256_hash(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Hex encoding utilities
mod hex {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

    pub fn encode(data: impl AsRef<[u8]>) -> String {
        let data = data.as_ref();
        let mut result = String::with_capacity(data.len() * 2);
        for byte in data {
            result.push(HEX_CHARS[(byte >> 4) as usize] as char);
            result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
        }
        result
    }
}
