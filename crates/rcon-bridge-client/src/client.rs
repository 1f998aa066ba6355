//! Bridge client: dial out, stay connected, relay operator input
//!
//! Two background tasks per client:
//! - connection task: connect, send the credential, run the receive loop,
//!   and on any failure close everything, wait and dial again
//! - heartbeat task: PING every interval while connected
//!
//! The connection task is the only place that opens or tears down the
//! socket. The heartbeat and the input path only write through the shared
//! write half, so a failed write there never starts a second reconnect.

use crate::output::OperatorOutput;
use rcon_bridge_core::{
    BridgeError, ClientConfig, Frame, MessageType, Result, read_frame, write_frame,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Snapshot of the client's connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Dial attempts, successful or not
    pub connect_attempts: u64,
    /// Dial attempts that failed
    pub failed_attempts: u64,
    /// Connections established
    pub successful_connects: u64,
    /// RCON credentials handed to the server
    pub credential_sends: u64,
    /// Keepalive pings written
    pub heartbeats_sent: u64,
}

#[derive(Default)]
struct Counters {
    connect_attempts: AtomicU64,
    failed_attempts: AtomicU64,
    successful_connects: AtomicU64,
    credential_sends: AtomicU64,
    heartbeats_sent: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ClientStats {
        ClientStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            successful_connects: self.successful_connects.load(Ordering::Relaxed),
            credential_sends: self.credential_sends.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one line of operator input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    /// `quit` or `exit`
    Quit,
    /// Sent to the bridge server as a COMMAND
    Sent,
    /// Not connected; the line was dropped
    Undeliverable,
    /// Blank line, nothing to do
    Empty,
}

struct ClientShared {
    config: ClientConfig,
    output: Arc<dyn OperatorOutput>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    counters: Counters,
}

/// Handle to a running bridge client
pub struct BridgeClient {
    shared: Arc<ClientShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BridgeClient {
    /// Start dialing the bridge server in the background
    pub fn start(config: ClientConfig, output: Arc<dyn OperatorOutput>) -> Self {
        if !config.has_password() {
            warn!("No RCON password configured, the server will not open an RCON session");
            output.notice("No RCON password configured; commands will not run until one is set");
        }

        let (shutdown_tx, _) = watch::channel(false);
        let shared = Arc::new(ClientShared {
            config,
            output,
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(true),
            shutdown_tx,
            counters: Counters::default(),
        });

        let connection = tokio::spawn(connection_loop(shared.clone()));
        let heartbeat = tokio::spawn(heartbeat_loop(shared.clone()));

        Self {
            shared,
            tasks: Mutex::new(vec![connection, heartbeat]),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ClientStats {
        self.shared.counters.snapshot()
    }

    /// Send one command; fails with `NotConnected` instead of queueing
    pub async fn send_command(&self, command: &str) -> Result<()> {
        self.shared.send(Frame::command(command)).await
    }

    /// Interpret one line typed by the operator
    pub async fn handle_input(&self, line: &str) -> InputOutcome {
        let line = line.trim();
        if line.is_empty() {
            return InputOutcome::Empty;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            return InputOutcome::Quit;
        }

        match self.send_command(line).await {
            Ok(()) => InputOutcome::Sent,
            Err(BridgeError::NotConnected(_)) => {
                self.shared.output.notice(&format!(
                    "Not connected to the bridge server, command not sent: {}",
                    line
                ));
                InputOutcome::Undeliverable
            }
            Err(e) => {
                self.shared
                    .output
                    .notice(&format!("Command not sent ({}): {}", e, line));
                InputOutcome::Undeliverable
            }
        }
    }

    /// Feed operator lines from `input` until quit or end of input, then shut down
    pub async fn run_input<R>(&self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut shutdown_rx = self.shared.shutdown_tx.subscribe();

        while self.is_running() {
            let line = tokio::select! {
                _ = shutdown_rx.changed() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                debug!("Input closed");
                break;
            };
            if self.handle_input(&line).await == InputOutcome::Quit {
                info!("Quit requested");
                break;
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stop reconnecting, close the connection and wait for the tasks
    pub async fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown_tx.send_replace(true);
        self.shared.close().await;

        for task in self.tasks.lock().await.drain(..) {
            let _ = task.await;
        }
        info!("Bridge client stopped");
    }
}

impl ClientShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(BridgeError::NotConnected("no bridge connection".into()));
        };
        write_frame(stream, &frame).await
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    /// Dial once; on success the write half is installed and the
    /// credential has been sent
    async fn establish(&self) -> Result<OwnedReadHalf> {
        Counters::bump(&self.counters.connect_attempts);
        let addr = self.config.server_addr();

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| BridgeError::Transport(format!("connect {}: {}", addr, e)))?;
        let _ = stream.set_nodelay(true);
        let (reader, mut writer) = stream.into_split();

        // The credential must be the first frame on every connection
        if self.config.has_password() {
            write_frame(
                &mut writer,
                &Frame::credentials(self.config.rcon_password.as_str()),
            )
            .await?;
            Counters::bump(&self.counters.credential_sends);
        }

        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
        Counters::bump(&self.counters.successful_connects);
        Ok(reader)
    }

    /// Dispatch inbound frames until the connection fails
    async fn receive(&self, mut reader: OwnedReadHalf) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        while self.is_running() {
            let frame = tokio::select! {
                _ = shutdown_rx.changed() => return Ok(()),
                frame = read_frame(&mut reader) => frame?,
            };

            match frame.kind {
                MessageType::Log => self.output.print_line(&frame.payload),
                MessageType::Pong => {}
                other => debug!("Ignoring {:?} frame from bridge server", other),
            }
        }
        Ok(())
    }

    /// Sleep for the reconnect delay; false when shut down meanwhile
    async fn pause(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.config.reconnect_delay()) => self.is_running(),
            _ = shutdown_rx.changed() => false,
        }
    }
}

async fn connection_loop(shared: Arc<ClientShared>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let addr = shared.config.server_addr();
    let delay = shared.config.reconnect_delay();

    while shared.is_running() {
        let reader = tokio::select! {
            _ = shutdown_rx.changed() => break,
            reader = shared.establish() => reader,
        };

        match reader {
            Ok(reader) => {
                info!("Connected to bridge server {}", addr);
                shared
                    .output
                    .notice(&format!("Connected to bridge server {}", addr));

                let result = shared.receive(reader).await;
                shared.close().await;
                if !shared.is_running() {
                    break;
                }

                let reason = match result {
                    Ok(()) => "closed".to_string(),
                    Err(BridgeError::ConnectionClosed) => "closed by server".to_string(),
                    Err(e) => e.to_string(),
                };
                warn!("Connection to {} lost: {}", addr, reason);
                shared.output.notice(&format!(
                    "Connection to {} lost ({}), reconnecting in {:?}",
                    addr, reason, delay
                ));
            }
            Err(e) => {
                Counters::bump(&shared.counters.failed_attempts);
                shared.close().await;
                debug!("Connect to {} failed: {}", addr, e);
                shared.output.notice(&format!(
                    "Could not connect to {} ({}), retrying in {:?}",
                    addr, e, delay
                ));
            }
        }

        if !shared.pause(&mut shutdown_rx).await {
            break;
        }
    }
    debug!("Connection loop exiting");
}

async fn heartbeat_loop(shared: Arc<ClientShared>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let period = shared.config.heartbeat_interval();
    if period.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    while shared.is_running() {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {}
        }
        if !shared.connected.load(Ordering::SeqCst) {
            continue;
        }

        // The receive loop notices a dead connection; a failed ping only logs
        match shared.send(Frame::ping()).await {
            Ok(()) => Counters::bump(&shared.counters.heartbeats_sent),
            Err(e) => debug!("Heartbeat not sent: {}", e),
        }
    }
}
