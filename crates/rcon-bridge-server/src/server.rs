//! Bridge server: one listener, at most one peer, one RCON session
//!
//! Tasks:
//! - accept loop: admits a peer when the slot is free, refuses otherwise
//! - receive loop (per admitted peer): decodes frames and dispatches them
//! - RCON task: (re)establishes the RCON session after credentials arrive,
//!   and again whenever a command finds the session dead
//! - forwarding task: drains the [`LogForwarder`] channel to the peer
//!
//! The peer's write half sits behind one mutex; every write and every
//! teardown takes it. The read half belongs to that peer's receive loop.

use crate::backend::CommandBackend;
use crate::sink::{LogForwarder, LogSink};
use rcon_bridge_core::{
    BridgeError, Frame, MessageType, Result, ServerConfig, read_frame, write_frame,
};
use rcon_client::RconClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Prefix put in front of RCON command output sent to the peer
pub const RESPONSE_PREFIX: &str = "[RCON Response]";

/// Prefix put in front of RCON session notices sent to the peer
pub const NOTICE_PREFIX: &str = "[RCON]";

/// The single connected remote console
struct Peer {
    id: u64,
    addr: SocketAddr,
    writer: OwnedWriteHalf,
}

struct Shared {
    config: ServerConfig,
    backend: Arc<dyn CommandBackend>,
    peer: Mutex<Option<Peer>>,
    next_peer_id: AtomicU64,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    rcon_task: Mutex<Option<JoinHandle<()>>>,
    /// Signalled by the command path when the RCON session dropped
    rcon_lost: Notify,
    forwarder: LogForwarder,
}

/// Handle to a running bridge server; clones share the same server
#[derive(Clone)]
pub struct BridgeServer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BridgeServer {
    /// Bind the listener and start serving, driving a real RCON client
    pub async fn start(config: ServerConfig) -> Result<Self> {
        let backend = RconClient::new(config.rcon_addr(), None)
            .with_auth_timeout(config.auth_timeout())
            .with_retry_interval(config.rcon_retry_interval());
        Self::start_with_backend(config, Arc::new(backend)).await
    }

    /// Bind the listener and start serving with a custom command backend
    pub async fn start_with_backend(
        config: ServerConfig,
        backend: Arc<dyn CommandBackend>,
    ) -> Result<Self> {
        let (forwarder, log_rx) = LogForwarder::channel();
        Self::start_with_log_channel(config, backend, forwarder, log_rx).await
    }

    /// Like `start_with_backend`, draining a log channel created up front
    ///
    /// Lets the host install a [`crate::ForwardingLayer`] before the server
    /// exists, so its own startup messages are captured too.
    pub async fn start_with_log_channel(
        config: ServerConfig,
        backend: Arc<dyn CommandBackend>,
        forwarder: LogForwarder,
        log_rx: mpsc::Receiver<String>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await.map_err(|e| {
            BridgeError::Transport(format!("failed to bind {}: {}", config.listen_addr(), e))
        })?;
        let local_addr = listener.local_addr()?;
        info!("Bridge server listening on {}", local_addr);

        let (shutdown_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            config,
            backend,
            peer: Mutex::new(None),
            next_peer_id: AtomicU64::new(0),
            running: AtomicBool::new(true),
            shutdown_tx,
            rcon_task: Mutex::new(None),
            rcon_lost: Notify::new(),
            forwarder,
        });

        let accept = tokio::spawn(accept_loop(shared.clone(), listener));
        let forward = tokio::spawn(forward_loop(shared.clone(), log_rx));

        Ok(Self {
            shared,
            local_addr,
            tasks: Arc::new(Mutex::new(vec![accept, forward])),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether a remote console is currently connected
    pub async fn has_peer(&self) -> bool {
        self.shared.peer.lock().await.is_some()
    }

    /// Whether the RCON session is authenticated
    pub fn rcon_connected(&self) -> bool {
        self.shared.backend.is_connected()
    }

    /// Send one log line to the peer, dropping it when nobody is connected
    pub async fn forward_line(&self, line: &str) {
        self.shared.forward_line(line).await;
    }

    /// A non-blocking sink for log producers
    pub fn log_sink(&self) -> LogForwarder {
        self.shared.forwarder.clone()
    }

    /// Resolves once `shutdown` has been called
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shared.shutdown_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stop accepting, close the peer and the RCON session
    ///
    /// In-flight messages are not drained.
    pub async fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown_tx.send_replace(true);

        if let Some(task) = self.shared.rcon_task.lock().await.take() {
            task.abort();
        }
        self.shared.backend.disconnect().await;

        if let Some(mut peer) = self.shared.peer.lock().await.take() {
            let _ = peer.writer.shutdown().await;
            info!("Closed connection to {}", peer.addr);
        }

        for task in self.tasks.lock().await.drain(..) {
            let _ = task.await;
        }
        info!("Bridge server stopped");
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();

    while shared.running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, addr)) => shared.admit(socket, addr).await,
                Err(e) => {
                    if !shared.running.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    debug!("Accept loop exiting");
}

async fn forward_loop(shared: Arc<Shared>, mut log_rx: mpsc::Receiver<String>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            line = log_rx.recv() => match line {
                Some(line) => shared.forward_line(&line).await,
                None => break,
            },
        }
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    peer_id: u64,
    addr: SocketAddr,
    mut reader: OwnedReadHalf,
) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();

    while shared.running.load(Ordering::SeqCst) {
        let frame = tokio::select! {
            _ = shutdown_rx.changed() => break,
            frame = read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(frame) => shared.handle_frame(peer_id, frame).await,
            Err(e) => {
                if shared.running.load(Ordering::SeqCst) {
                    match e {
                        BridgeError::ConnectionClosed => {
                            info!("Remote console {} disconnected", addr)
                        }
                        e => warn!("Connection to remote console {} lost: {}", addr, e),
                    }
                }
                shared.drop_peer(peer_id).await;
                break;
            }
        }
    }
    debug!("Receive loop for {} exiting", addr);
}

impl Shared {
    /// Admit the connection if the peer slot is free, otherwise close it
    async fn admit(self: &Arc<Self>, mut socket: TcpStream, addr: SocketAddr) {
        let mut slot = self.peer.lock().await;

        if let Some(active) = slot.as_ref() {
            let refusal = BridgeError::PolicyViolation(format!(
                "{} refused, {} is already connected",
                addr, active.addr
            ));
            warn!("{}", refusal);
            let _ = socket.shutdown().await;
            return;
        }

        let _ = socket.set_nodelay(true);
        let (reader, writer) = socket.into_split();
        let peer_id = self.next_peer_id.fetch_add(1, Ordering::SeqCst) + 1;
        *slot = Some(Peer {
            id: peer_id,
            addr,
            writer,
        });
        drop(slot);

        info!("Remote console connected: {}", addr);
        tokio::spawn(receive_loop(self.clone(), peer_id, addr, reader));
    }

    async fn handle_frame(self: &Arc<Self>, peer_id: u64, frame: Frame) {
        match frame.kind {
            MessageType::RconCredentials => {
                if frame.payload.is_empty() {
                    warn!("Ignoring empty RCON credential");
                    self.send_to_peer(
                        peer_id,
                        Frame::log(format!("{} Empty RCON password ignored", NOTICE_PREFIX)),
                    )
                    .await;
                    return;
                }
                self.start_rcon_session(frame.payload).await;
            }
            MessageType::Command => self.execute_command(peer_id, &frame.payload).await,
            MessageType::Ping => {
                self.send_to_peer(peer_id, Frame::pong()).await;
            }
            other => debug!("Ignoring {:?} frame from remote console", other),
        }
    }

    /// Replace any RCON session with one using `password`, off the receive loop
    async fn start_rcon_session(self: &Arc<Self>, password: String) {
        let mut task = self.rcon_task.lock().await;
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let shared = self.clone();
        *task = Some(tokio::spawn(async move {
            let backend = shared.backend.clone();
            let target = backend.target();
            let interval = shared.config.rcon_retry_interval();

            backend.reset(password).await;
            info!("RCON credential received, connecting to {}", target);

            let notices = shared.forwarder.clone();
            let mut on_failure = |e: &BridgeError| {
                let line = match e {
                    BridgeError::AuthRejected(_) => format!(
                        "{} Authentication rejected by {}, retrying in {}s",
                        NOTICE_PREFIX,
                        target,
                        interval.as_secs()
                    ),
                    e => format!(
                        "{} Connection attempt failed: {}, retrying in {}s",
                        NOTICE_PREFIX,
                        e,
                        interval.as_secs()
                    ),
                };
                notices.forward_line(&line);
            };

            loop {
                match backend.connect_with_retry(interval, &mut on_failure).await {
                    Ok(()) => {
                        info!("RCON session established with {}", target);
                        shared
                            .forward_line(&format!("{} Connected to {}", NOTICE_PREFIX, target))
                            .await;
                    }
                    Err(BridgeError::Cancelled) => {
                        debug!("RCON connect to {} cancelled", target);
                        return;
                    }
                    Err(e) => {
                        error!("Giving up on RCON session with {}: {}", target, e);
                        shared
                            .forward_line(&format!("{} Cannot connect: {}", NOTICE_PREFIX, e))
                            .await;
                        return;
                    }
                }

                // A stale signal from an earlier session only costs a recheck
                while backend.is_connected() {
                    shared.rcon_lost.notified().await;
                }

                warn!("RCON session with {} lost, reconnecting", target);
                shared
                    .forward_line(&format!(
                        "{} Connection to {} lost, reconnecting",
                        NOTICE_PREFIX, target
                    ))
                    .await;
            }
        }));
    }

    async fn execute_command(&self, peer_id: u64, command: &str) {
        let command = command.trim();
        if command.is_empty() {
            return;
        }

        if !self.backend.is_connected() {
            warn!("Command dropped, RCON not connected: {}", command);
            self.send_to_peer(
                peer_id,
                Frame::log(format!(
                    "{} Not connected to RCON, command not executed: {}",
                    NOTICE_PREFIX, command
                )),
            )
            .await;
            return;
        }

        info!("Executing command: {}", command);
        match self.backend.execute(command).await {
            Ok(response) => {
                let response = response.trim_end();
                if !response.is_empty() {
                    self.send_to_peer(
                        peer_id,
                        Frame::log(format!("{} {}", RESPONSE_PREFIX, response)),
                    )
                    .await;
                }
            }
            Err(e) => {
                self.send_to_peer(
                    peer_id,
                    Frame::log(format!("{} Command failed: {}", NOTICE_PREFIX, e)),
                )
                .await;
                if !self.backend.is_connected() {
                    self.rcon_lost.notify_one();
                }
            }
        }
    }

    /// Write to the peer with id `peer_id`; tears the peer down on failure
    async fn send_to_peer(&self, peer_id: u64, frame: Frame) -> bool {
        let mut slot = self.peer.lock().await;
        let Some(peer) = slot.as_mut().filter(|p| p.id == peer_id) else {
            return false;
        };

        match write_frame(&mut peer.writer, &frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Write to remote console {} failed: {}", peer.addr, e);
                if let Some(mut peer) = slot.take() {
                    let _ = peer.writer.shutdown().await;
                }
                false
            }
        }
    }

    async fn forward_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        let peer_id = match self.peer.lock().await.as_ref() {
            Some(peer) => peer.id,
            None => return,
        };
        self.send_to_peer(peer_id, Frame::log(line)).await;
    }

    /// Free the slot if it still holds `peer_id`
    async fn drop_peer(&self, peer_id: u64) {
        let mut slot = self.peer.lock().await;
        if slot.as_ref().is_some_and(|p| p.id == peer_id) {
            if let Some(mut peer) = slot.take() {
                let _ = peer.writer.shutdown().await;
                info!("Peer slot free, waiting for the next remote console");
            }
        }
    }
}
