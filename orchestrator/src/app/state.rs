//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::canary::{CanaryEndpoints, HttpCanary};
use crate::channel::TelegramClient;
use crate::deploy::processor::Collaborators;
use crate::deploy::requests::Provisioner;
use crate::deploy::{JobProcessor, TcpProbe};
use crate::errors::DeployError;
use crate::runtime::DockerCli;
use crate::store::{SqliteStore, Store};

/// Main application state
pub struct AppState {
    /// Job store
    pub store: Arc<dyn Store>,

    /// Queue consumer
    pub processor: Arc<JobProcessor>,

    /// Queue producer
    pub provisioner: Arc<Provisioner>,

    sqlite: SqliteStore,
}

impl AppState {
    /// Initialize application state against the real runtime, canary and channel
    pub async fn init(options: &AppOptions) -> Result<Self, DeployError> {
        info!("Initializing application state...");

        let sqlite = SqliteStore::connect(&options.database_url, options.max_db_connections).await?;
        let store: Arc<dyn Store> = Arc::new(sqlite.clone());

        let canary = Arc::new(HttpCanary::new(CanaryEndpoints::default(), options.canary_timeout)?);

        let deps = Collaborators {
            store: store.clone(),
            runtime: Arc::new(DockerCli::new(options.orchestrator.docker_bin.clone())),
            probe: Arc::new(TcpProbe),
            canary,
            channel: Arc::new(TelegramClient::new()?),
        };

        let processor = Arc::new(JobProcessor::new(deps.clone(), options.orchestrator.clone()));
        let provisioner = Arc::new(Provisioner::new(deps, processor.clone()));

        Ok(Self {
            store,
            processor,
            provisioner,
            sqlite,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), DeployError> {
        info!("Shutting down application state...");
        self.sqlite.close().await;
        Ok(())
    }
}
