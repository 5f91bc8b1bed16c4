//! Error types for the deployment orchestrator

use thiserror::Error;

use crate::canary::CanaryFailure;

/// Substrings the container runtime emits when a published host port is taken
const PORT_CONFLICT_MARKERS: [&str; 2] = ["port is already allocated", "address already in use"];

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("No free runtime port available in range {start}-{end}")]
    PortExhaustion { start: u16, end: u16 },

    #[error("Port {port} was allocated concurrently: {detail}")]
    PortConflict { port: u16, detail: String },

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// A runtime command failed. Both fields are redacted before construction.
    #[error("{command} failed: {stderr}")]
    Runtime { command: String, stderr: String },

    #[error("Container failed to start ({state}). Logs: {logs}")]
    ContainerStart { state: String, logs: String },

    #[error("Runtime canary failed: {0}")]
    CanaryError(#[from] CanaryFailure),

    #[error("API key rejected: {0}")]
    KeyRejected(CanaryFailure),

    #[error("Config write error: {0}")]
    ConfigWriteError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Whether this is a runtime failure caused by a host port collision.
    pub fn is_port_conflict(&self) -> bool {
        match self {
            DeployError::PortConflict { .. } => true,
            DeployError::Runtime { stderr, .. } => {
                let lower = stderr.to_lowercase();
                PORT_CONFLICT_MARKERS.iter().any(|m| lower.contains(m))
            }
            _ => false,
        }
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}
