//! Task publishing utility
//!
//! Publishes a single message to the relay's exchange for manual experiments.
//!
//! ## Usage
//!
//! ```bash
//! # Critical task, callback to a local listener
//! publish-task --routing-key orders.critical.function \
//!   --reply-to http://localhost:9000/cb --payload '{"order": 42}'
//!
//! # Non-critical task with a fixed correlation id
//! publish-task --routing-key billing.normal.function --correlation-id run-1
//! ```

use clap::Parser;
use function_relay::config::RelayConfig;
use function_relay::observability::init_default_logging;
use function_relay::transport::amqp::AmqpClient;
use lapin::BasicProperties;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "publish-task",
    about = "Publish a test delivery to the function relay's exchange"
)]
struct Args {
    /// Routing key, `<function>.<marker>[...]`
    #[arg(long, required = true)]
    routing_key: String,

    /// Callback address for the function's result
    #[arg(long)]
    reply_to: Option<String>,

    /// Correlation id (random UUID if not provided)
    #[arg(long)]
    correlation_id: Option<String>,

    /// Message payload
    #[arg(long, default_value = "{}")]
    payload: String,

    /// Exchange to publish to (defaults to the configured exchange)
    #[arg(long)]
    exchange: Option<String>,

    /// Configuration file with broker settings
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_default_logging(false);

    if let Err(e) = publish(args).await {
        error!(error = %e, "Publish failed");
        process::exit(1);
    }
}

async fn publish(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig::load(args.config.as_deref())?;
    let exchange = args
        .exchange
        .unwrap_or_else(|| config.broker.exchange.clone());
    let correlation_id = args
        .correlation_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut properties = BasicProperties::default()
        .with_correlation_id(correlation_id.as_str().into())
        .with_content_type("application/json".into());
    if let Some(reply_to) = &args.reply_to {
        properties = properties.with_reply_to(reply_to.as_str().into());
    }

    let client = AmqpClient::connect(&config.broker).await?;
    client
        .publish(
            &exchange,
            &args.routing_key,
            args.payload.as_bytes(),
            properties,
        )
        .await?;

    info!(
        exchange = %exchange,
        routing_key = %args.routing_key,
        correlation_id = %correlation_id,
        reply_to = args.reply_to.as_deref().unwrap_or(""),
        "Task published"
    );

    client.close().await?;
    Ok(())
}
