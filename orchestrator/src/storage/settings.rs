//! Settings file and environment management

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Job store location
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Container runtime configuration
    #[serde(default)]
    pub runtime: RuntimeSettings,

    /// Upstream model ids per model key
    #[serde(default)]
    pub models: ModelSettings,

    /// Worker tick server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Seconds between background queue ticks; 0 disables the ticker
    #[serde(default)]
    pub tick_interval_secs: u64,

    /// Maximum jobs drained per background tick
    #[serde(default = "default_tick_batch")]
    pub tick_batch: usize,

    /// Upstream credential canary timeout in seconds
    #[serde(default = "default_canary_timeout")]
    pub canary_timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite://clawd.db".to_string()
}

fn default_tick_batch() -> usize {
    5
}

fn default_canary_timeout() -> u64 {
    12
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            database_url: default_database_url(),
            runtime: RuntimeSettings::default(),
            models: ModelSettings::default(),
            server: ServerSettings::default(),
            tick_interval_secs: 0,
            tick_batch: default_tick_batch(),
            canary_timeout_secs: default_canary_timeout(),
        }
    }
}

impl Settings {
    /// Load settings from an optional JSON file, then apply environment overrides.
    pub async fn load(path: Option<&Path>) -> Result<Self, DeployError> {
        let mut settings = match path {
            Some(path) => File::new(path).read_json::<Settings>().await.map_err(|e| {
                DeployError::ConfigError(format!("Unable to read settings {}: {}", path.display(), e))
            })?,
            None => Settings::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply `CLAWD_*` overrides using the given variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), DeployError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(level) = get("CLAWD_LOG_LEVEL") {
            self.log_level = level.parse().map_err(DeployError::ConfigError)?;
        }
        if let Some(url) = get("CLAWD_DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(network) = get("CLAWD_DOCKER_NETWORK") {
            self.runtime.network = network;
        }
        if let Some(root) = get("CLAWD_TENANT_ROOT") {
            self.runtime.tenant_root = PathBuf::from(root);
        }
        if let Some(image) = get("CLAWD_RUNTIME_IMAGE") {
            self.runtime.image = image;
        }
        if let Some(model) = get("CLAWD_MODEL_GPT") {
            self.models.gpt = model;
        }
        if let Some(model) = get("CLAWD_MODEL_CLAUDE") {
            self.models.claude = model;
        }
        if let Some(model) = get("CLAWD_MODEL_GEMINI") {
            self.models.gemini = model;
        }
        if let Some(token) = get("CLAWD_WORKER_TOKEN") {
            self.server.worker_token = Some(token);
        }
        Ok(())
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<(), DeployError> {
        // Binding port 0 always succeeds with an ephemeral port
        if self.runtime.port_range_start == 0 {
            return Err(DeployError::ConfigError("port_range_start must be at least 1".to_string()));
        }
        if self.runtime.port_range_start > self.runtime.port_range_end {
            return Err(DeployError::ConfigError(format!(
                "Invalid port range {}-{}",
                self.runtime.port_range_start, self.runtime.port_range_end
            )));
        }
        if self.runtime.start_attempts == 0 {
            return Err(DeployError::ConfigError("start_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Container runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Runtime CLI binary
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Shared bridge network for tenant containers
    #[serde(default = "default_network")]
    pub network: String,

    /// Root directory holding one config directory per tenant
    #[serde(default = "default_tenant_root")]
    pub tenant_root: PathBuf,

    /// Runtime image reference
    #[serde(default = "default_image")]
    pub image: String,

    /// Port the runtime listens on inside the container
    #[serde(default = "default_internal_port")]
    pub internal_port: u16,

    /// Config path inside the container
    #[serde(default = "default_container_config_dir")]
    pub container_config_dir: String,

    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,

    /// Wait before checking that a new container is running
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Log lines captured from a container that failed to start
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,

    /// Total container start attempts when ports collide
    #[serde(default = "default_start_attempts")]
    pub start_attempts: u32,
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_network() -> String {
    "clawd-net".to_string()
}

fn default_tenant_root() -> PathBuf {
    PathBuf::from(".clawd-tenants")
}

fn default_image() -> String {
    "ghcr.io/openclaw/openclaw:latest".to_string()
}

fn default_internal_port() -> u16 {
    18789
}

fn default_container_config_dir() -> String {
    "/home/node/.openclaw".to_string()
}

fn default_port_range_start() -> u16 {
    19000
}

fn default_port_range_end() -> u16 {
    19999
}

fn default_settle_ms() -> u64 {
    2500
}

fn default_log_tail() -> usize {
    80
}

fn default_start_attempts() -> u32 {
    3
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            docker_bin: default_docker_bin(),
            network: default_network(),
            tenant_root: default_tenant_root(),
            image: default_image(),
            internal_port: default_internal_port(),
            container_config_dir: default_container_config_dir(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            settle_ms: default_settle_ms(),
            log_tail: default_log_tail(),
            start_attempts: default_start_attempts(),
        }
    }
}

/// Upstream model ids for the three supported model keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_model_gpt")]
    pub gpt: String,

    #[serde(default = "default_model_claude")]
    pub claude: String,

    #[serde(default = "default_model_gemini")]
    pub gemini: String,
}

fn default_model_gpt() -> String {
    "openai/gpt-4.1".to_string()
}

fn default_model_claude() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

fn default_model_gemini() -> String {
    "google/gemini-2.5-pro".to_string()
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            gpt: default_model_gpt(),
            claude: default_model_claude(),
            gemini: default_model_gemini(),
        }
    }
}

impl ModelSettings {
    /// Resolve a model key to its upstream model id.
    ///
    /// Known keys map through the table, anything else passes through, and an
    /// empty model falls back to the gpt mapping.
    pub fn resolve(&self, model: &str) -> String {
        match model {
            "gpt" => self.gpt.clone(),
            "claude" => self.claude.clone(),
            "gemini" => self.gemini.clone(),
            "" => self.gpt.clone(),
            other => other.to_string(),
        }
    }
}

/// Worker tick server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Shared secret required on tick requests, when set
    #[serde(default, skip_serializing)]
    pub worker_token: Option<String>,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8088
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            worker_token: None,
        }
    }
}
