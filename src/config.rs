//! Configuration for the sensor relay.
//!
//! Values are resolved in ascending priority: built-in defaults, an optional
//! config file, `MES_CLIENT_*` environment variables, and finally CLI flags
//! (applied by `main`). The resolved [`AppConfig`] is passed by value into
//! component constructors; nothing reads configuration globally.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Application configuration for the sensor relay.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Path to the Snort3 JSON alert file to tail.
    #[serde(default = "default_file")]
    pub file: String,

    /// Aggregation service host.
    #[serde(default = "default_server")]
    pub server: String,

    /// Aggregation service port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Disables TLS on the aggregator channel.
    #[serde(default)]
    pub insecure: bool,

    /// CA certificate (PEM) used to verify the aggregator, when set.
    #[serde(default)]
    pub cert_file: Option<String>,

    /// Overrides the TLS server name, when set.
    #[serde(default)]
    pub server_name: Option<String>,

    /// Coalescing window in seconds: an entry is flushed once it has gone
    /// this long without a new occurrence.
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Opaque sensor identifier stamped on every event. Part of the event
    /// identity, so two sensors never coalesce into each other.
    #[serde(default = "default_sensor_id")]
    pub sensor_id: String,

    /// Read the alert file to EOF once instead of following it. Implies
    /// `insecure`.
    #[serde(default)]
    pub testing_mode: bool,

    /// Maximum number of batches in flight towards the aggregator.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Transport message cap in MiB, applied to both directions.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Seconds of send inactivity after which the stream is half-closed.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Listen address of the Prometheus scrape endpoint.
    #[serde(default = "default_metrics_listen_address")]
    pub metrics_listen_address: String,

    /// Truncate the alert file to zero length on shutdown, so a restart
    /// does not re-process delivered alerts.
    #[serde(default)]
    pub truncate_on_exit: bool,
}

fn default_file() -> String {
    "/var/log/snort/alert_json.txt".to_owned()
}

fn default_server() -> String {
    "localhost".to_owned()
}

fn default_port() -> u16 {
    50051
}

fn default_interval() -> u64 {
    1
}

fn default_sensor_id() -> String {
    "sensor1".to_owned()
}

fn default_max_clients() -> usize {
    10
}

fn default_max_message_size() -> usize {
    100
}

fn default_idle_timeout() -> u64 {
    10
}

fn default_metrics_listen_address() -> String {
    "0.0.0.0:9101".to_owned()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            file: default_file(),
            server: default_server(),
            port: default_port(),
            insecure: false,
            cert_file: None,
            server_name: None,
            interval: default_interval(),
            sensor_id: default_sensor_id(),
            testing_mode: false,
            max_clients: default_max_clients(),
            max_message_size: default_max_message_size(),
            idle_timeout: default_idle_timeout(),
            metrics_listen_address: default_metrics_listen_address(),
            truncate_on_exit: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from an optional file plus `MES_CLIENT_*`
    /// environment variables.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder.add_source(Environment::with_prefix("MES_CLIENT")).build()?;
        let mut config: AppConfig = settings.try_deserialize()?;
        config.normalize();
        Ok(config)
    }

    /// Applies cross-field rules; call after any override pass.
    pub fn normalize(&mut self) {
        if self.testing_mode {
            self.insecure = true;
            self.server_name = None;
        }
    }

    /// Coalescing window in whole seconds.
    pub fn coalescing_window_secs(&self) -> i64 {
        self.interval as i64
    }

    /// Stream idle-close timeout.
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    /// Transport message cap in bytes.
    pub fn max_message_bytes(&self) -> usize {
        self.max_message_size * 1024 * 1024
    }

    /// URI of the aggregation endpoint, scheme chosen by `insecure`.
    pub fn endpoint_uri(&self) -> String {
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{}://{}:{}", scheme, self.server, self.port)
    }
}
