//! Process lifecycle.
//!
//! The Supervisor owns every long-running component and runs them under a
//! single cancellation scope: the file tailer, the 1 Hz flush loop, the
//! metrics endpoint and the 10 s metrics sampler, plus the signal handler.
//! The first task to finish, for any reason, tears the rest down; shutdown
//! then drains in-flight sends and releases the aggregator connection.

use std::sync::Arc;

use thiserror::Error;
use tokio::{signal, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    config::AppConfig,
    metrics::{MetricsError, SensorMetrics},
    queue::EventBatchQueue,
    stream::{StreamError, StreamManager},
    tailer::{FileTailer, TailerError},
};

/// Errors that abort the supervisor. The first one raised by a supervised
/// task becomes the process exit status.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The tailer failed to open or follow the alert file.
    #[error("tailer error: {0}")]
    Tailer(#[from] TailerError),

    /// The stream manager could not be constructed.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// The metrics registry or endpoint failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

/// The primary runtime manager for the sensor relay.
pub struct Supervisor {
    config: AppConfig,
    queue: Arc<EventBatchQueue>,
    tailer: Arc<FileTailer>,
    stream: Arc<StreamManager>,
    metrics: Arc<SensorMetrics>,
}

impl Supervisor {
    /// Constructs all components from the resolved configuration.
    pub fn new(config: AppConfig) -> Result<Self, SupervisorError> {
        let queue = Arc::new(EventBatchQueue::new(config.coalescing_window_secs()));
        let tailer = Arc::new(FileTailer::new(&config));
        let stream = Arc::new(StreamManager::connect(&config)?);
        let metrics = Arc::new(SensorMetrics::new()?);
        Ok(Self { config, queue, tailer, stream, metrics })
    }

    /// Runs until a signal arrives or a supervised task finishes, then
    /// shuts everything down in order.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let token = CancellationToken::new();
        let mut join_set: JoinSet<Result<(), SupervisorError>> = JoinSet::new();

        // Signal handler: SIGINT / SIGTERM begin a graceful shutdown. Also
        // exits when some other task triggers the shutdown first.
        {
            let token = token.clone();
            join_set.spawn(async move {
                let ctrl_c = signal::ctrl_c();
                #[cfg(unix)]
                let terminate = async {
                    signal::unix::signal(signal::unix::SignalKind::terminate())
                        .expect("Failed to register SIGTERM handler")
                        .recv()
                        .await;
                };
                #[cfg(not(unix))]
                let terminate = std::future::pending::<()>();

                tokio::select! {
                    _ = ctrl_c => tracing::info!("SIGINT received, initiating graceful shutdown."),
                    _ = terminate => tracing::info!("SIGTERM received, initiating graceful shutdown."),
                    _ = token.cancelled() => {}
                }
                token.cancel();
                Ok(())
            });
        }

        // File tailer.
        {
            let tailer = Arc::clone(&self.tailer);
            let queue = Arc::clone(&self.queue);
            let token = token.clone();
            join_set.spawn(async move {
                let result = tailer.run(token, queue).await;
                tracing::info!(ok = result.is_ok(), "Tailer job finished.");
                result.map_err(SupervisorError::from)
            });
        }

        // Flush loop.
        {
            let queue = Arc::clone(&self.queue);
            let stream = Arc::clone(&self.stream);
            let token = token.clone();
            let max_inflight = self.config.max_clients;
            join_set.spawn(async move {
                queue.run_flusher(token, stream, max_inflight).await;
                Ok(())
            });
        }

        // Metrics endpoint.
        {
            let metrics = Arc::clone(&self.metrics);
            let addr = self.config.metrics_listen_address.clone();
            let token = token.clone();
            join_set.spawn(async move {
                let result = metrics.serve(addr, token).await;
                tracing::info!(ok = result.is_ok(), "Metrics endpoint job finished.");
                result.map_err(SupervisorError::from)
            });
        }

        // Metrics sampler.
        {
            let metrics = Arc::clone(&self.metrics);
            let tailer = Arc::clone(&self.tailer);
            let queue = Arc::clone(&self.queue);
            let token = token.clone();
            join_set.spawn(async move {
                let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            metrics.record(&tailer, &queue);
                            tracing::debug!(
                                read_persec = tailer.read_per_second(),
                                processed_persec = queue.events_processed_per_second(),
                                batch_sent_persec = queue.batches_sent_per_second(),
                                queue_size = queue.size(),
                                "Metrics sampled."
                            );
                        }
                    }
                }
                tracing::info!("Metrics sampler stopped.");
                Ok(())
            });
        }

        let mut first_error: Option<SupervisorError> = None;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!(%error, "A supervised task failed, initiating shutdown.");
                    first_error.get_or_insert(error);
                }
                Err(join_error) => {
                    tracing::error!(%join_error, "A supervised task panicked, initiating shutdown.");
                }
            }
            // The first task to finish, for any reason, tears the rest down.
            token.cancel();
            self.tailer.stop();
        }

        self.stream.close().await;
        tracing::info!("Supervisor shutdown complete.");

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
