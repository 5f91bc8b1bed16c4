//! Periodic queue ticker

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, error, info};

use crate::deploy::JobProcessor;
use crate::redact::redact;

/// Ticker worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between ticks
    pub interval: Duration,

    /// Jobs drained per tick
    pub batch: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            batch: 5,
        }
    }
}

/// Drain the queue every `interval` until shutdown
pub async fn run<S, F>(
    options: &Options,
    processor: &JobProcessor,
    sleep_fn: S,
    mut shutdown_signal: BoxFuture<'static, ()>,
) where
    S: Fn(Duration) -> F,
    F: std::future::Future<Output = ()>,
{
    info!(interval = ?options.interval, batch = options.batch, "Queue ticker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Queue ticker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        match processor.process_queue(options.batch.max(1)).await {
            Ok(ids) if ids.is_empty() => debug!("Queue empty"),
            Ok(ids) => info!(processed = ids.len(), "Queue tick complete"),
            Err(e) => error!("Queue tick failed: {}", redact(&e.to_string())),
        }
    }
}
