//! rcon-bridge-client: operator console for a remote rcon-bridge-server

use anyhow::Result;
use clap::Parser;
use rcon_bridge_client::{BridgeClient, ConsoleOutput};
use rcon_bridge_core::{ClientConfig, config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "rcon-bridge-client",
    about = "Remote console for a game server behind rcon-bridge-server"
)]
struct Args {
    /// JSON config file; written with defaults if missing
    #[arg(long, default_value = "rcon-bridge-client.json")]
    config: PathBuf,

    /// Bridge server host
    #[arg(long)]
    host: Option<String>,

    /// Bridge server port
    #[arg(long)]
    port: Option<u16>,

    /// RCON password handed to the bridge server on connect
    #[arg(long, env = "RCON_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    let mut config: ClientConfig = config::load_or_default(&args.config)?;
    if let Some(host) = args.host {
        config.server_host = host;
    }
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(password) = args.password {
        config.rcon_password = password;
    }

    info!("Connecting to bridge server {}", config.server_addr());
    let client = BridgeClient::start(config, Arc::new(ConsoleOutput));

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = client.run_input(stdin) => result?,
        _ = tokio::signal::ctrl_c() => warn!("Interrupted"),
    }

    client.shutdown().await;

    // A pending stdin read sits on a blocking thread the runtime would wait for
    std::process::exit(0)
}
