//! Outbound event stream to the aggregation service.
//!
//! One [`StreamManager`] wraps one lazily-connected channel. The streaming
//! RPC itself is opened on demand by the first send, half-closed after an
//! idle timeout, and reopened transparently by the next send or after a
//! transmit failure. The manager's mutex guards only the stream handle;
//! actual transmission happens on a locally captured sender so a slow send
//! never blocks `close` or the idle watchdog.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

use crate::{
    config::AppConfig,
    pb::{sensor_service_client::SensorServiceClient, SensorEvent},
};

/// Hand-off capacity between `send` and the RPC driver. Kept at one so a
/// dead stream is noticed on the next send rather than after a buffer of
/// events has gone missing.
const CHANNEL_CAPACITY: usize = 1;

/// Pause between retries of the same event in [`StreamManager::send_batch`].
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Errors from the stream manager.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The configured endpoint or TLS setup is unusable. Fatal at startup.
    #[error("invalid aggregator endpoint: {0}")]
    Endpoint(#[from] tonic::transport::Error),

    /// The CA certificate file could not be read. Fatal at startup.
    #[error("failed to read CA certificate {path}: {source}")]
    CaCertificate {
        /// Configured certificate path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The RPC terminated with a status; the stream has been torn down and
    /// the next send will open a fresh one.
    #[error("stream transmit failed: {0}")]
    Transmit(tonic::Status),

    /// The stream ended without a status to report.
    #[error("stream closed while sending")]
    Closed,
}

struct ActiveStream {
    generation: u64,
    tx: mpsc::Sender<SensorEvent>,
    /// Drives the RPC; resolves with the aggregator's ack once the sender
    /// side is dropped (the half-close), or earlier on transport failure.
    driver: JoinHandle<Result<(), tonic::Status>>,
    last_send: Instant,
}

/// Owns the connection to the aggregation service and the lifecycle of the
/// streaming RPC running over it.
pub struct StreamManager {
    client: SensorServiceClient<Channel>,
    active: Arc<Mutex<Option<ActiveStream>>>,
    idle_timeout: Duration,
    next_generation: AtomicU64,
}

impl StreamManager {
    /// Builds the (lazy) channel from configuration. No connection is
    /// attempted until the first send.
    pub fn connect(config: &AppConfig) -> Result<Self, StreamError> {
        let mut endpoint = Endpoint::from_shared(config.endpoint_uri())?;

        if !config.insecure {
            let mut tls = ClientTlsConfig::new().with_native_roots();
            if let Some(path) = &config.cert_file {
                let pem = std::fs::read(path).map_err(|source| StreamError::CaCertificate {
                    path: path.clone(),
                    source,
                })?;
                tls = tls.ca_certificate(Certificate::from_pem(pem));
            }
            if let Some(name) = &config.server_name {
                tls = tls.domain_name(name);
            }
            endpoint = endpoint.tls_config(tls)?;
        }

        let client = SensorServiceClient::new(endpoint.connect_lazy())
            .max_decoding_message_size(config.max_message_bytes())
            .max_encoding_message_size(config.max_message_bytes());

        Ok(Self {
            client,
            active: Arc::new(Mutex::new(None)),
            idle_timeout: config.stream_idle_timeout(),
            next_generation: AtomicU64::new(0),
        })
    }

    /// Transmits one event, opening the stream if none is open and
    /// refreshing the idle timer on success. On failure the stream is torn
    /// down so the next send starts over.
    pub async fn send(&self, mut event: SensorEvent) -> Result<(), StreamError> {
        let tx = self.checkout_stream().await;
        event.event_sent_at = chrono::Utc::now().timestamp_micros();
        if tx.send(event).await.is_err() {
            return Err(self.teardown().await);
        }
        Ok(())
    }

    /// Sends a batch, retrying each event until it goes through or `token`
    /// is cancelled. Returns the number of metrics delivered, which is
    /// partial after cancellation.
    pub async fn send_batch(&self, token: &CancellationToken, events: Vec<SensorEvent>) -> i64 {
        let mut delivered = 0;
        for event in events {
            let metrics_count = event.event_metrics_count;
            loop {
                if token.is_cancelled() {
                    tracing::info!(delivered, "Batch send cancelled, returning partial count.");
                    return delivered;
                }
                match self.send(event.clone()).await {
                    Ok(()) => {
                        delivered += metrics_count;
                        break;
                    }
                    Err(error) => {
                        tracing::error!(%error, "Failed to send event, retrying.");
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => return delivered,
                            _ = tokio::time::sleep(RETRY_DELAY) => {}
                        }
                    }
                }
            }
        }
        delivered
    }

    /// Half-closes any open stream and waits for the aggregator's ack.
    /// Idempotent.
    pub async fn close(&self) {
        let stream = self.active.lock().await.take();
        if let Some(ActiveStream { tx, driver, .. }) = stream {
            drop(tx);
            match driver.await {
                Ok(Ok(())) => tracing::info!("Event stream closed."),
                Ok(Err(status)) => tracing::warn!(%status, "Event stream closed with error."),
                Err(error) => tracing::warn!(%error, "Stream driver task failed."),
            }
        }
        tracing::info!("Connection to aggregation service released.");
    }

    /// Returns a sender for the current stream, opening one if needed. The
    /// lock is held only to read or replace the handle.
    async fn checkout_stream(&self) -> mpsc::Sender<SensorEvent> {
        let mut active = self.active.lock().await;

        if let Some(stream) = active.as_mut() {
            if stream.tx.is_closed() {
                // The RPC already ended; its status was (or will be)
                // reported by whoever hit the failure. Discard the carcass.
                tracing::debug!("Discarding dead event stream before reopening.");
                *active = None;
            } else {
                stream.last_send = Instant::now();
                return stream.tx.clone();
            }
        }

        tracing::info!("Opening event stream to aggregator.");
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut client = self.client.clone();
        let driver = tokio::spawn(async move {
            client
                .stream_events(tonic::Request::new(ReceiverStream::new(rx)))
                .await
                .map(|_ack| ())
        });

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        *active =
            Some(ActiveStream { generation, tx: tx.clone(), driver, last_send: Instant::now() });

        tokio::spawn(idle_watchdog(Arc::clone(&self.active), generation, self.idle_timeout));

        tx
    }

    /// Removes the active stream and recovers the RPC's terminal status for
    /// the error returned to the caller.
    async fn teardown(&self) -> StreamError {
        let stream = self.active.lock().await.take();
        match stream {
            Some(ActiveStream { tx, driver, .. }) => {
                drop(tx);
                match driver.await {
                    Ok(Ok(())) => StreamError::Closed,
                    Ok(Err(status)) => StreamError::Transmit(status),
                    Err(_) => StreamError::Closed,
                }
            }
            None => StreamError::Closed,
        }
    }
}

/// Half-closes the stream of `generation` once it has seen no send for
/// `idle_timeout`. Exits quietly if the stream was replaced or torn down.
async fn idle_watchdog(
    active: Arc<Mutex<Option<ActiveStream>>>,
    generation: u64,
    idle_timeout: Duration,
) {
    loop {
        let deadline = {
            let guard = active.lock().await;
            match guard.as_ref() {
                Some(stream) if stream.generation == generation => stream.last_send + idle_timeout,
                _ => return,
            }
        };

        if Instant::now() < deadline {
            tokio::time::sleep_until(deadline).await;
            continue;
        }

        let stream = {
            let mut guard = active.lock().await;
            match guard.as_ref() {
                Some(stream) if stream.generation == generation => guard.take(),
                _ => return,
            }
        };
        if let Some(ActiveStream { tx, driver, .. }) = stream {
            tracing::info!("Idle timeout reached, half-closing event stream.");
            drop(tx);
            match driver.await {
                Ok(Ok(())) => tracing::debug!("Aggregator acknowledged the idle-closed stream."),
                Ok(Err(status)) => tracing::warn!(%status, "Stream failed during idle close."),
                Err(error) => tracing::warn!(%error, "Stream driver task failed."),
            }
        }
        return;
    }
}
