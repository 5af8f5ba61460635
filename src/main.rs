use clap::Parser;
use mes_sensor::{config::AppConfig, supervisor::Supervisor};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(author, version, about = "Tails Snort3 JSON alerts, coalesces duplicates and streams batches to the aggregation service", long_about = None)]
struct Cli {
    /// Path to a configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Path to the Snort alert file.
    #[arg(short, long)]
    file: Option<String>,

    /// Aggregation service host.
    #[arg(short, long)]
    server: Option<String>,

    /// Aggregation service port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Disable TLS on the aggregator channel.
    #[arg(long)]
    insecure: bool,

    /// Coalescing window in seconds.
    #[arg(short, long)]
    interval: Option<u64>,

    /// Sensor identifier stamped on every event.
    #[arg(long)]
    sensor_id: Option<String>,

    /// Read the alert file once and exit; implies --insecure.
    #[arg(short, long)]
    testing_mode: bool,

    /// Maximum number of batches in flight towards the aggregator.
    #[arg(short = 'k', long)]
    max_clients: Option<usize>,

    /// Transport message cap in MiB.
    #[arg(short = 'm', long)]
    max_message_size: Option<usize>,

    /// Increase output verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(file) = &self.file {
            config.file = file.clone();
        }
        if let Some(server) = &self.server {
            config.server = server.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.insecure {
            config.insecure = true;
        }
        if let Some(interval) = self.interval {
            config.interval = interval;
        }
        if let Some(sensor_id) = &self.sensor_id {
            config.sensor_id = sensor_id.clone();
        }
        if self.testing_mode {
            config.testing_mode = true;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(max_message_size) = self.max_message_size {
            config.max_message_size = max_message_size;
        }
        config.normalize();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    tracing::info!(
        file = %config.file,
        server = %config.server,
        port = config.port,
        insecure = config.insecure,
        interval = config.interval,
        sensor_id = %config.sensor_id,
        testing_mode = config.testing_mode,
        max_clients = config.max_clients,
        max_message_size = config.max_message_size,
        "Starting sensor relay."
    );

    let supervisor = Supervisor::new(config)?;
    supervisor.run().await?;

    Ok(())
}
