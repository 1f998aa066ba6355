//! rcon-bridge-server: exposes a game server's RCON console and log output
//! to one remote rcon-bridge-client over TCP.

use anyhow::Result;
use clap::Parser;
use rcon_bridge_core::{ServerConfig, config};
use rcon_bridge_server::{
    BridgeServer, ForwardingLayer, LogForwarder, LogTailer, capture_child_output,
};
use rcon_client::RconClient;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "rcon-bridge-server",
    about = "Bridge a game server's RCON console to a remote client"
)]
struct Args {
    /// JSON config file; written with defaults if missing
    #[arg(long, default_value = "rcon-bridge-server.json")]
    config: PathBuf,

    /// Port to accept the remote console on
    #[arg(long)]
    listen_port: Option<u16>,

    /// RCON host of the game server
    #[arg(long)]
    rcon_host: Option<String>,

    /// RCON port of the game server
    #[arg(long)]
    rcon_port: Option<u16>,

    /// Log file to follow and forward (e.g. logs/latest.log)
    #[arg(long)]
    tail: Option<PathBuf>,

    /// Forward the tailed file's existing contents as well
    #[arg(long, default_value_t = false)]
    tail_from_start: bool,

    /// Game server command to run, its output is forwarded
    /// (e.g. `-- java -jar server.jar nogui`)
    #[arg(last = true)]
    exec: Vec<String>,
}

fn init_logging(forwarder: LogForwarder) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(ForwardingLayer::new(forwarder))
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (forwarder, log_rx) = LogForwarder::channel();
    init_logging(forwarder.clone())?;

    let mut config: ServerConfig = config::load_or_default(&args.config)?;
    if let Some(port) = args.listen_port {
        config.listen_port = port;
    }
    if let Some(host) = args.rcon_host {
        config.rcon_host = host;
    }
    if let Some(port) = args.rcon_port {
        config.rcon_port = port;
    }

    info!(
        "Starting rcon-bridge-server, listen {}, RCON target {}",
        config.listen_addr(),
        config.rcon_addr()
    );

    let backend = RconClient::new(config.rcon_addr(), None)
        .with_auth_timeout(config.auth_timeout())
        .with_retry_interval(config.rcon_retry_interval());
    let server =
        BridgeServer::start_with_log_channel(config, Arc::new(backend), forwarder, log_rx).await?;

    if let Some(path) = args.tail {
        let tailer = LogTailer::new(path).from_start(args.tail_from_start);
        let sink = server.log_sink();
        let shutdown = server.shutdown_signal();
        tokio::spawn(async move {
            if let Err(e) = tailer.run(sink, shutdown).await {
                error!("Log tailer stopped: {}", e);
            }
        });
    }

    match args.exec.split_first() {
        Some((program, program_args)) => {
            tokio::select! {
                status = capture_child_output(program, program_args, server.log_sink(), true) => {
                    match status {
                        Ok(status) => info!("Game server exited: {}", status),
                        Err(e) => error!("Game server could not run: {}", e),
                    }
                }
                _ = tokio::signal::ctrl_c() => warn!("Interrupted, stopping game server"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    server.shutdown().await;
    Ok(())
}
