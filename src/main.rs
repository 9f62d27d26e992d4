//! CLI for chatbridge
//!
//! Subcommands:
//! - `server`: run the gateway
//! - `client`: connect to a topic and chat from stdin

use std::sync::Arc;

use chatbridge::broker::{KafkaBroker, LogBroker, MemoryBroker};
use chatbridge::client::ChatClient;
use chatbridge::config::load_config;
use chatbridge::transport::{Gateway, start_websocket_server};
use chatbridge::utils::logging::{self, LogFormat};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "chatbridge")]
enum Command {
    /// Start the gateway
    Server {
        /// Keep topics in process memory instead of connecting to Kafka
        #[arg(long)]
        in_memory: bool,
    },
    /// Chat on a topic: stdin lines are sent, messages are printed
    Client {
        /// Subscribe endpoint of the gateway
        #[arg(long, default_value = "ws://127.0.0.1:8080/chat/subscribe")]
        url: String,
        #[arg(long)]
        topic: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let result = match cmd {
        Command::Server { in_memory } => run_server(in_memory).await,
        Command::Client { url, topic } => {
            logging::init("warn", LogFormat::Pretty);
            run_client(&url, &topic).await
        }
    };

    if let Err(e) = result {
        error!("{e}");
        eprintln!("chatbridge: {e}");
        std::process::exit(1);
    }
}

async fn run_server(in_memory: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    logging::init(&config.log.level, LogFormat::parse(&config.log.format));

    let broker: Arc<dyn LogBroker> = if in_memory {
        info!("using in-memory broker");
        Arc::new(MemoryBroker::new())
    } else {
        info!(brokers = ?config.kafka.brokers, "connecting to kafka");
        Arc::new(KafkaBroker::connect(&config.kafka).await?)
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let gateway = Arc::new(Gateway::new(broker, &config));

    let mut server = tokio::spawn({
        let gateway = gateway.clone();
        async move { start_websocket_server(&addr, gateway).await }
    });
    tokio::select! {
        stopped = &mut server => return Ok(stopped??),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, closing sessions");
            gateway.shutdown();
        }
    }

    server.await??;
    Ok(())
}

async fn run_client(url: &str, topic: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = ChatClient::connect(url, topic).await?;
    client.run(BufReader::new(tokio::io::stdin())).await?;
    Ok(())
}
