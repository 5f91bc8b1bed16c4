//! Application configuration options

use std::time::Duration;

use crate::deploy::OrchestratorOptions;
use crate::storage::settings::Settings;
use crate::workers::ticker;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Job store location
    pub database_url: String,

    /// Pool size for the job store
    pub max_db_connections: u32,

    /// Deployment orchestration configuration
    pub orchestrator: OrchestratorOptions,

    /// Upstream credential canary timeout
    pub canary_timeout: Duration,

    /// Enable the worker tick HTTP server
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Background queue ticker; `None` leaves draining to external ticks
    pub ticker: Option<ticker::Options>,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let ticker = (settings.tick_interval_secs > 0).then(|| ticker::Options {
            interval: Duration::from_secs(settings.tick_interval_secs),
            batch: settings.tick_batch,
        });

        Self {
            database_url: settings.database_url.clone(),
            max_db_connections: 5,
            orchestrator: OrchestratorOptions::from_settings(settings),
            canary_timeout: Duration::from_secs(settings.canary_timeout_secs),
            enable_server: true,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
                worker_token: settings.server.worker_token.clone(),
            },
            ticker,
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Local HTTP server options
#[derive(Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Shared secret required on worker ticks
    pub worker_token: Option<String>,
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("worker_token", &self.worker_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8088,
            worker_token: None,
        }
    }
}
