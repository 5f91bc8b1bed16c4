//! Main application run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::app::state::AppState;
use crate::errors::DeployError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::ticker;

/// Run the orchestrator service until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployError> {
    info!("Initializing clawd...");

    let app_state = Arc::new(AppState::init(&options).await?);
    run_with_state(options, app_state, shutdown_signal).await
}

/// Run the service loop over already-initialized state
pub async fn run_with_state(
    options: AppOptions,
    app_state: Arc<AppState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployError> {
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), options.max_shutdown_delay, app_state.clone());

    if let Err(e) = init_workers(&options, &app_state, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start clawd: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init_workers(
    options: &AppOptions,
    app_state: &Arc<AppState>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DeployError> {
    if options.enable_server {
        init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    if let Some(ticker_options) = options.ticker.clone() {
        init_ticker(ticker_options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe());
    }

    Ok(())
}

fn init_ticker(
    options: ticker::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!("Initializing queue ticker...");

    let processor = app_state.processor.clone();
    let handle = tokio::spawn(async move {
        ticker::run(
            &options,
            processor.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.ticker_handle = Some(handle);
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployError> {
    info!("Initializing worker tick server...");

    let server_state = ServerState::new(app_state.processor.clone(), options.server.worker_token.clone());

    let handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.server_handle = Some(handle);
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    max_shutdown_delay: Duration,
    app_state: Arc<AppState>,
    server_handle: Option<JoinHandle<Result<(), DeployError>>>,
    ticker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, max_shutdown_delay: Duration, app_state: Arc<AppState>) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay,
            app_state,
            server_handle: None,
            ticker_handle: None,
        }
    }

    async fn shutdown(&mut self) -> Result<(), DeployError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeployError> {
        info!("Shutting down clawd...");

        // 1. Ticker finishes its in-flight batch
        if let Some(handle) = self.ticker_handle.take() {
            handle.await.map_err(|e| DeployError::Internal(e.to_string()))?;
        }

        // 2. Server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| DeployError::ServerError(e.to_string()))??;
        }

        // 3. App state
        self.app_state.shutdown().await?;

        info!("Shutdown complete");
        Ok(())
    }
}
