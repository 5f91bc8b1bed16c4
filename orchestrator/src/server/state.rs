//! Server state

use std::sync::Arc;

use crate::deploy::JobProcessor;

/// Server state shared across handlers
pub struct ServerState {
    pub processor: Arc<JobProcessor>,

    /// Shared secret expected on tick requests; `None` disables the check
    pub worker_token: Option<String>,
}

impl ServerState {
    pub fn new(processor: Arc<JobProcessor>, worker_token: Option<String>) -> Self {
        Self {
            processor,
            worker_token: worker_token.filter(|t| !t.is_empty()),
        }
    }
}
