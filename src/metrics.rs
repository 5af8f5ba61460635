//! Prometheus exposition of the sensor's operational counters.

use std::sync::Arc;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{queue::EventBatchQueue, tailer::FileTailer};

/// Errors from the metrics endpoint.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A gauge or counter failed to register. Fatal at startup.
    #[error("failed to register metrics: {0}")]
    Registry(#[from] prometheus::Error),

    /// The listen address could not be bound. Fatal at startup.
    #[error("failed to bind metrics endpoint {addr}: {source}")]
    Bind {
        /// Configured listen address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The HTTP server terminated with an error.
    #[error("metrics server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Registry plus the sensor gauges and counters, sampled every ten seconds
/// by the supervisor and scraped over HTTP.
pub struct SensorMetrics {
    registry: Registry,
    event_read_per_second: IntGauge,
    event_processed_per_second: IntGauge,
    event_batch_sent_per_second: IntGauge,
    batch_queue_size: IntGauge,
    batch_queue_event_size: IntGauge,
    total_processed_events: IntCounter,
    total_sent_events: IntCounter,
}

impl SensorMetrics {
    /// Creates and registers all sensor metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let event_read_per_second = IntGauge::new(
            "mataelang_sensor_event_read_per_second",
            "Number of events read per second from the Snort3 JSON file.",
        )?;
        let event_processed_per_second = IntGauge::new(
            "mataelang_sensor_event_processed_per_second",
            "Number of events processed per second.",
        )?;
        let event_batch_sent_per_second = IntGauge::new(
            "mataelang_sensor_event_batch_sent_per_second",
            "Number of batch events sent per second.",
        )?;
        let batch_queue_size =
            IntGauge::new("mataelang_sensor_batch_queue_size", "Size of the batch queue.")?;
        let batch_queue_event_size = IntGauge::new(
            "mataelang_sensor_batch_queue_event_size",
            "Size of the event queued in the batch queue.",
        )?;
        let total_processed_events = IntCounter::new(
            "mataelang_sensor_total_processed_events",
            "Total number of processed events.",
        )?;
        let total_sent_events = IntCounter::new(
            "mataelang_sensor_total_sent_events",
            "Total number of sent events.",
        )?;

        registry.register(Box::new(event_read_per_second.clone()))?;
        registry.register(Box::new(event_processed_per_second.clone()))?;
        registry.register(Box::new(event_batch_sent_per_second.clone()))?;
        registry.register(Box::new(batch_queue_size.clone()))?;
        registry.register(Box::new(batch_queue_event_size.clone()))?;
        registry.register(Box::new(total_processed_events.clone()))?;
        registry.register(Box::new(total_sent_events.clone()))?;

        Ok(Self {
            registry,
            event_read_per_second,
            event_processed_per_second,
            event_batch_sent_per_second,
            batch_queue_size,
            batch_queue_event_size,
            total_processed_events,
            total_sent_events,
        })
    }

    /// Samples the tailer and queue counters into the registry.
    pub fn record(&self, tailer: &FileTailer, queue: &EventBatchQueue) {
        self.event_read_per_second.set(tailer.read_per_second());
        self.event_processed_per_second.set(queue.events_processed_per_second());
        self.event_batch_sent_per_second.set(queue.batches_sent_per_second());
        self.batch_queue_size.set(queue.size() as i64);
        self.batch_queue_event_size.set(queue.event_size());
        self.total_processed_events.inc_by(queue.take_total_processed_events().max(0) as u64);
        self.total_sent_events.inc_by(queue.take_total_sent_events().max(0) as u64);
    }

    /// Serves `/metrics` on `addr` until cancelled.
    pub async fn serve(
        self: Arc<Self>,
        addr: String,
        token: CancellationToken,
    ) -> Result<(), MetricsError> {
        let registry = self.registry.clone();
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move { render_metrics(&registry) }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| MetricsError::Bind { addr: addr.clone(), source })?;
        tracing::info!(%addr, "Metrics endpoint listening.");

        axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
            .map_err(MetricsError::Serve)?;

        tracing::info!("Metrics endpoint stopped.");
        Ok(())
    }
}

fn render_metrics(registry: &Registry) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!(%error, "Failed to encode metrics.");
        return (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response();
    }
    ([(header::CONTENT_TYPE, encoder.format_type().to_owned())], buffer).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_metrics_once() {
        let metrics = SensorMetrics::new().expect("registration must succeed");
        let families = metrics.registry.gather();
        assert_eq!(families.len(), 7);
        assert!(families.iter().all(|f| f.get_name().starts_with("mataelang_sensor_")));
    }

    #[test]
    fn counters_accumulate_on_record() {
        let metrics = SensorMetrics::new().expect("registration must succeed");
        metrics.total_processed_events.inc_by(3);
        metrics.total_processed_events.inc_by(2);
        assert_eq!(metrics.total_processed_events.get(), 5);
    }
}
