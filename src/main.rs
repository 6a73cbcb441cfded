//! CLI for PushRelay
//!
//! Subcommands:
//! - `server`: run the relay
//! - `publish`: publish one message to a running relay
//! - `subscribe`: print every frame delivered on a channel

use std::sync::Arc;

use clap::Parser;
use pushrelay::broker::Broker;
use pushrelay::client::{Publisher, subscribe};
use pushrelay::config::{Settings, load_config};
use pushrelay::transport::{AppState, start_server};
use pushrelay::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pushrelay", version)]
enum Command {
    /// Start the relay server
    Server,
    /// Publish a message to a channel
    Publish {
        /// Base URL of the relay
        #[arg(long, env = "PUSHRELAY_URL", default_value = "http://127.0.0.1:9080")]
        url: String,
        #[arg(long)]
        channel: String,
        /// Message body, sent as-is
        #[arg(long)]
        data: String,
    },
    /// Subscribe to a channel and print each delivered frame
    Subscribe {
        /// Base URL of the relay
        #[arg(long, env = "PUSHRELAY_URL", default_value = "http://127.0.0.1:9080")]
        url: String,
        #[arg(long)]
        channel: String,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&config.logging.level);

    let result = match cmd {
        Command::Server => run_server(config).await,
        Command::Publish { url, channel, data } => run_publish(&url, &channel, data).await,
        Command::Subscribe { url, channel } => run_subscribe(&url, &channel).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_server(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.server.bind_addr();
    let broker = Arc::new(Broker::new(config.broker));

    tokio::spawn(Broker::start_retention_loop(broker.clone()));

    tokio::select! {
        result = start_server(&addr, AppState::new(broker)) => {
            result?;
            error!("Relay server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_publish(url: &str, channel: &str, data: String) -> Result<(), Box<dyn std::error::Error>> {
    let ack = Publisher::new(url)?.publish(channel, data).await?;
    println!("{}", serde_json::to_string(&ack)?);
    Ok(())
}

async fn run_subscribe(url: &str, channel: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = subscribe(url, &[channel]).await?;
    info!(connection_id = ?stream.connection_id(), channel, "Subscribed");

    loop {
        tokio::select! {
            frame = stream.next_frame() => match frame? {
                Some(frame) => println!(
                    "id:{} [{}] {}",
                    frame.id,
                    frame.channel,
                    String::from_utf8_lossy(&frame.payload)
                ),
                None => {
                    info!("Relay closed the stream");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}
