//! RCON session with authentication and auto-reconnect

use crate::packet::{PacketType, RconPacket, packet_type, read_packet, write_packet};
use rcon_bridge_core::{BridgeError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Default bound on the auth handshake
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause between connection attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Socket-side state, only ever touched under the session lock
struct Session {
    stream: Option<TcpStream>,
    password: Option<String>,
    next_id: i32,
}

impl Session {
    fn next_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

/// RCON client for a single game server
///
/// The socket lives behind one async mutex that is held for the whole
/// connect/authenticate handshake and for every request/reply pair, so a
/// reconnect never interleaves with a command on the wire.
pub struct RconClient {
    /// Server address
    address: String,
    session: Mutex<Session>,
    /// Whether the current socket completed authentication
    authenticated: AtomicBool,
    /// Bumped by `disconnect` to cancel running retry loops
    epoch: AtomicU64,
    cancel: Notify,
    auth_timeout: Duration,
    retry_interval: Duration,
}

impl RconClient {
    /// Create a new client; no connection is made until `connect`
    pub fn new(address: impl Into<String>, password: Option<String>) -> Self {
        Self {
            address: address.into(),
            session: Mutex::new(Session {
                stream: None,
                password,
                next_id: 1,
            }),
            authenticated: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            cancel: Notify::new(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_auth_timeout(mut self, auth_timeout: Duration) -> Self {
        self.auth_timeout = auth_timeout;
        self
    }

    /// Interval used when `send_command` has to reconnect inline
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Replace the credential used by the next connection attempt
    pub async fn set_password(&self, password: impl Into<String>) {
        self.session.lock().await.password = Some(password.into());
    }

    /// Connect and authenticate, returning whether it succeeded
    ///
    /// Any previous connection is torn down first.
    pub async fn connect(&self) -> bool {
        match self.try_connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!("RCON connect to {} failed: {}", self.address, e);
                false
            }
        }
    }

    /// Connect and authenticate, reporting why it failed
    pub async fn try_connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;

        self.authenticated.store(false, Ordering::SeqCst);
        session.close().await;
        session.next_id = 1;

        let password = session
            .password
            .clone()
            .ok_or_else(|| BridgeError::Config("no RCON password set".into()))?;

        info!("Connecting to RCON at {}", self.address);
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| BridgeError::Transport(format!("RCON connect failed: {}", e)))?;
        let _ = stream.set_nodelay(true);

        let auth_id = session.next_id();
        write_packet(&mut stream, &RconPacket::new(auth_id, PacketType::Auth, password)).await?;

        let response = timeout(self.auth_timeout, read_auth_response(&mut stream))
            .await
            .map_err(|_| {
                BridgeError::Transport(format!(
                    "RCON auth reply timed out after {:?}",
                    self.auth_timeout
                ))
            })??;

        if response.is_auth_failure() {
            return Err(BridgeError::AuthRejected(format!(
                "{} refused the password",
                self.address
            )));
        }

        if response.id != auth_id {
            warn!(
                "RCON auth response ID mismatch: expected {}, got {}",
                auth_id, response.id
            );
        }

        session.stream = Some(stream);
        self.authenticated.store(true, Ordering::SeqCst);
        info!("RCON authenticated with {}", self.address);

        Ok(())
    }

    /// Keep calling `connect` until it succeeds
    ///
    /// Never gives up on its own. Returns [`BridgeError::Cancelled`] if
    /// `disconnect` is called while it is waiting, or the underlying error if
    /// it cannot be fixed by retrying (no password configured).
    pub async fn connect_with_retry(&self, interval: Duration) -> Result<()> {
        self.connect_with_retry_observed(interval, |_| {}).await
    }

    /// `connect_with_retry`, calling `on_failure` after every failed attempt
    pub async fn connect_with_retry_observed<F>(
        &self,
        interval: Duration,
        mut on_failure: F,
    ) -> Result<()>
    where
        F: FnMut(&BridgeError),
    {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let mut attempt: u64 = 0;

        loop {
            let cancelled = self.cancel.notified();
            tokio::pin!(cancelled);

            if self.epoch.load(Ordering::SeqCst) != epoch {
                return Err(BridgeError::Cancelled);
            }

            attempt += 1;
            match self.try_connect().await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    warn!(
                        "RCON attempt {} to {} failed: {}, retrying in {:?}",
                        attempt, self.address, e, interval
                    );
                    on_failure(&e);
                }
            }

            if self.epoch.load(Ordering::SeqCst) != epoch {
                return Err(BridgeError::Cancelled);
            }

            tokio::select! {
                _ = sleep(interval) => {}
                _ = &mut cancelled => {
                    debug!("RCON retry loop cancelled");
                    return Err(BridgeError::Cancelled);
                }
            }
        }
    }

    /// Check if connected and authenticated
    pub fn is_connected(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Execute a command, reconnecting inline first if needed
    ///
    /// Returns the reply body, or an empty string on any failure; the
    /// failure also marks the session disconnected.
    pub async fn send_command(&self, command: &str) -> String {
        if !self.is_connected() {
            if let Err(e) = self.connect_with_retry(self.retry_interval).await {
                warn!("RCON not available for command: {}", e);
                return String::new();
            }
        }

        match self.execute(command).await {
            Ok(body) => body,
            Err(e) => {
                warn!("RCON command failed: {}", e);
                String::new()
            }
        }
    }

    /// Execute a command on the current connection without reconnecting
    pub async fn execute(&self, command: &str) -> Result<String> {
        let mut session = self.session.lock().await;

        if !self.is_connected() {
            return Err(BridgeError::NotConnected("RCON not authenticated".into()));
        }

        let cmd_id = session.next_id();
        let packet = RconPacket::new(cmd_id, PacketType::ExecCommand, command);

        let result = match session.stream.as_mut() {
            Some(stream) => exchange(stream, &packet).await,
            None => Err(BridgeError::NotConnected("RCON not connected".into())),
        };

        match result {
            Ok(response) => {
                if response.id != cmd_id {
                    debug!(
                        "Response ID mismatch: expected {}, got {}",
                        cmd_id, response.id
                    );
                }
                debug!(
                    "RCON response: {}",
                    response.body.chars().take(100).collect::<String>()
                );
                Ok(response.body)
            }
            Err(e) => {
                warn!("RCON connection to {} lost: {}", self.address, e);
                self.authenticated.store(false, Ordering::SeqCst);
                session.close().await;
                Err(e)
            }
        }
    }

    /// Disconnect from the server and cancel pending retry loops
    ///
    /// Safe to call any number of times.
    pub async fn disconnect(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel.notify_waiters();

        self.authenticated.store(false, Ordering::SeqCst);
        let mut session = self.session.lock().await;
        let had_stream = session.stream.is_some();
        session.close().await;
        self.authenticated.store(false, Ordering::SeqCst);

        if had_stream {
            info!("RCON disconnected from {}", self.address);
        }
    }
}

async fn exchange(stream: &mut TcpStream, packet: &RconPacket) -> Result<RconPacket> {
    debug!("RCON exec: {}", packet.body);
    write_packet(stream, packet).await?;
    read_packet(stream).await
}

/// Read the auth verdict, skipping the empty RESPONSE_VALUE some Source
/// servers send ahead of it
async fn read_auth_response(stream: &mut TcpStream) -> Result<RconPacket> {
    let first = read_packet(stream).await?;
    if first.packet_type == packet_type::RESPONSE_VALUE && !first.is_auth_failure() {
        return read_packet(stream).await;
    }
    Ok(first)
}
