//! Function relay entry point
//!
//! Consumes routed deliveries from RabbitMQ and relays them to HTTP functions.

use clap::{Parser, Subcommand};
use function_relay::config::RelayConfig;
use function_relay::error::{sanitize_error_message, RelayError};
use function_relay::observability::{init_default_logging, metrics, HealthServer};
use function_relay::transport::amqp::AmqpClient;
use function_relay::worker::QueueWorker;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Relay AMQP topic deliveries to HTTP functions
#[derive(Parser)]
#[command(name = "function-relay")]
#[command(about = "Relays AMQP topic deliveries to HTTP functions and their callbacks")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Event sink address (accepted for compatibility, not used)
    #[arg(long, value_name = "URL")]
    sink: Option<String>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume and relay deliveries (default)
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration with secrets redacted
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match RelayConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // Logging is configured from the relay config, so this goes to stderr
            eprintln!(
                "Failed to load configuration: {}",
                sanitize_error_message(&e.to_string())
            );
            process::exit(1);
        }
    };
    if cli.sink.is_some() {
        config.relay.sink = cli.sink.clone();
    }

    init_default_logging(config.relay.debug || cli.verbose > 0);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting function relay"
    );

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_relay(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!(error = %sanitize_error_message(&e.to_string()), "Relay failed");
        process::exit(1);
    }

    info!("Relay shutdown complete");
}

async fn run_relay(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let collector = metrics();
    collector.set_relay_state("initializing");

    if let Some(sink) = &config.relay.sink {
        debug!(sink = %sink, "Sink address accepted but not used");
    }

    let relay_id = config.broker.consumer_tag();
    let health_server = if config.health.enabled {
        let server = Arc::new(HealthServer::new(relay_id.clone(), config.health.port));
        tokio::spawn(server.clone().start());
        Some(server)
    } else {
        None
    };

    let client = match connect(&config).await {
        Ok(client) => client,
        Err(e) => {
            collector.set_relay_state("failed");
            return Err(e.into());
        }
    };

    if let Some(server) = &health_server {
        server.set_broker_connected(true);
        tokio::spawn(track_broker_status(server.clone()));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        if shutdown_tx.send(true).is_err() {
            warn!("Queue worker already stopped");
        }
    });

    info!(
        mode = ?config.relay.delivery_mode,
        consumer_tag = %relay_id,
        "Relay is running and waiting for deliveries"
    );

    let mut worker = QueueWorker::from_config(client, &config.relay, shutdown_rx);
    let outcome = worker.run().await;

    collector.set_relay_state("stopping");
    let client = worker.into_subscription();
    if let Err(e) = client.close().await {
        warn!(error = %e, "Error closing broker connection");
    }

    match outcome {
        Ok(()) => {
            collector.set_relay_state("stopped");
            Ok(())
        }
        Err(e) => {
            collector.set_relay_state("failed");
            if let RelayError::DispatchFatal { destination, .. } = &e {
                error!(destination = %destination, "Stopping relay after failed dispatch");
            }
            Err(e.into())
        }
    }
}

/// Connect, declare the topology and register the consumer
async fn connect(config: &RelayConfig) -> Result<AmqpClient, RelayError> {
    let mut client = AmqpClient::connect(&config.broker).await?;
    client.declare_topology(&config.broker).await?;
    client.start_consuming(&config.broker.consumer_tag()).await?;
    Ok(client)
}

async fn wait_for_signal() {
    let (mut sigint, mut sigterm) = match (
        signal::unix::signal(signal::unix::SignalKind::interrupt()),
        signal::unix::signal(signal::unix::SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        _ => {
            warn!("Signal handlers unavailable, falling back to ctrl-c");
            match signal::ctrl_c().await {
                Ok(()) => info!("Received ctrl-c, shutting down gracefully..."),
                Err(e) => {
                    // Without a listener the relay runs until the process is killed
                    error!(error = %e, "Failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            }
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

/// Mirror the broker connection flag into the readiness probe
async fn track_broker_status(server: Arc<HealthServer>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        server.set_broker_connected(metrics().is_broker_connected());
    }
}

fn handle_config_command(
    config: &RelayConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Effective relay configuration:");
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!(broker = %config.broker.redacted_uri(), "Configuration validation complete");
    Ok(())
}
