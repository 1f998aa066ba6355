//! End-to-end behaviour of the bridge server over real sockets

mod common;

use async_trait::async_trait;
use common::*;
use rcon_bridge_core::{BridgeError, Frame, MessageType, Result};
use rcon_bridge_server::{BridgeServer, CommandBackend, LogSink};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

/// Backend that never connects and counts execution attempts
#[derive(Default)]
struct OfflineBackend {
    executed: AtomicUsize,
}

#[async_trait]
impl CommandBackend for OfflineBackend {
    fn target(&self) -> String {
        "offline:0".into()
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn reset(&self, _password: String) {}

    async fn connect_with_retry(
        &self,
        _interval: Duration,
        _on_failure: &mut (dyn for<'e> FnMut(&'e BridgeError) + Send),
    ) -> Result<()> {
        std::future::pending().await
    }

    async fn execute(&self, _command: &str) -> Result<String> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        Err(BridgeError::NotConnected("offline backend".into()))
    }

    async fn disconnect(&self) {}
}

async fn offline_server() -> (BridgeServer, Arc<OfflineBackend>) {
    let backend = Arc::new(OfflineBackend::default());
    let server = assert_ok!(
        BridgeServer::start_with_backend(server_config(None), backend.clone()).await
    );
    (server, backend)
}

async fn wait_for_peer(server: &BridgeServer, present: bool) {
    let server = server.clone();
    assert!(
        eventually(|| {
            let server = server.clone();
            async move { server.has_peer().await == present }
        })
        .await,
        "peer presence never became {}",
        present
    );
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    let (server, _) = offline_server().await;
    let mut peer = connect_peer(server.local_addr()).await;

    send(&mut peer, Frame::ping()).await;
    let reply = recv(&mut peer).await.unwrap();
    assert_eq!(reply.kind, MessageType::Pong);
    assert_eq!(reply.payload, "");

    server.shutdown().await;
}

#[tokio::test]
async fn test_second_peer_is_refused_first_keeps_working() {
    let (server, _) = offline_server().await;
    let mut first = connect_peer(server.local_addr()).await;
    wait_for_peer(&server, true).await;

    let mut second = connect_peer(server.local_addr()).await;
    assert_err!(recv(&mut second).await);

    send(&mut first, Frame::ping()).await;
    assert_eq!(recv(&mut first).await.unwrap().kind, MessageType::Pong);
    assert!(server.has_peer().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_slot_is_freed_when_peer_leaves() {
    let (server, _) = offline_server().await;
    let first = connect_peer(server.local_addr()).await;
    wait_for_peer(&server, true).await;

    drop(first);
    wait_for_peer(&server, false).await;

    let mut next = connect_peer(server.local_addr()).await;
    send(&mut next, Frame::ping()).await;
    assert_eq!(recv(&mut next).await.unwrap().kind, MessageType::Pong);

    server.shutdown().await;
}

#[tokio::test]
async fn test_command_without_rcon_is_reported_not_executed() {
    let (server, backend) = offline_server().await;
    let mut peer = connect_peer(server.local_addr()).await;

    send(&mut peer, Frame::command("list")).await;
    let line = recv_log(&mut peer).await;
    assert_eq!(
        line,
        "[RCON] Not connected to RCON, command not executed: list"
    );
    assert_eq!(backend.executed.load(Ordering::SeqCst), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_empty_credential_is_ignored() {
    let (server, _) = offline_server().await;
    let mut peer = connect_peer(server.local_addr()).await;

    send(&mut peer, Frame::credentials("")).await;
    let line = recv_log(&mut peer).await;
    assert!(line.starts_with("[RCON]"), "{}", line);
    assert!(line.contains("ignored"), "{}", line);

    server.shutdown().await;
}

#[tokio::test]
async fn test_log_lines_reach_the_peer_and_blank_lines_do_not() {
    let (server, _) = offline_server().await;

    // Nobody connected yet: dropped, not buffered
    server.forward_line("[INFO] before anyone listens").await;

    let mut peer = connect_peer(server.local_addr()).await;
    wait_for_peer(&server, true).await;

    server.forward_line("   ").await;
    server.forward_line("[INFO] Done (3.1s)!").await;
    server.log_sink().forward_line("");
    server.log_sink().forward_line("[WARN] Can't keep up!");

    assert_eq!(recv_log(&mut peer).await, "[INFO] Done (3.1s)!");
    assert_eq!(recv_log(&mut peer).await, "[WARN] Can't keep up!");

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_frame_types_are_ignored() {
    let (server, _) = offline_server().await;
    let mut peer = connect_peer(server.local_addr()).await;

    send(&mut peer, Frame::new(MessageType::Unknown(99), "??")).await;
    send(&mut peer, Frame::log("peers do not send logs")).await;
    send(&mut peer, Frame::ping()).await;
    assert_eq!(recv(&mut peer).await.unwrap().kind, MessageType::Pong);

    server.shutdown().await;
}

#[tokio::test]
async fn test_command_is_relayed_over_rcon() {
    let rcon = fake_rcon_target("secret").await;
    let server = assert_ok!(BridgeServer::start(server_config(Some(rcon))).await);
    let mut peer = connect_peer(server.local_addr()).await;

    send(&mut peer, Frame::credentials("secret")).await;
    let notice = recv_log(&mut peer).await;
    assert_eq!(notice, format!("[RCON] Connected to {}", rcon));
    assert!(server.rcon_connected());

    send(&mut peer, Frame::command("say hi")).await;
    assert_eq!(recv_log(&mut peer).await, "[RCON Response] hi");

    server.shutdown().await;
    assert!(!server.rcon_connected());
}

#[tokio::test]
async fn test_rejected_password_is_reported_and_retried() {
    let rcon = fake_rcon_target("secret").await;
    let server = assert_ok!(BridgeServer::start(server_config(Some(rcon))).await);
    let mut peer = connect_peer(server.local_addr()).await;

    send(&mut peer, Frame::credentials("wrong")).await;
    let first = recv_log(&mut peer).await;
    assert!(first.contains("Authentication rejected"), "{}", first);
    let second = recv_log(&mut peer).await;
    assert!(second.contains("Authentication rejected"), "{}", second);
    assert!(!server.rcon_connected());

    // A fresh credential replaces the failing session
    send(&mut peer, Frame::credentials("secret")).await;
    let mut line = recv_log(&mut peer).await;
    while line.contains("Authentication rejected") {
        line = recv_log(&mut peer).await;
    }
    assert_eq!(line, format!("[RCON] Connected to {}", rcon));

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_the_peer() {
    let (server, _) = offline_server().await;
    let mut peer = connect_peer(server.local_addr()).await;
    wait_for_peer(&server, true).await;

    server.shutdown().await;
    assert!(!server.is_running());
    assert!(matches!(
        recv(&mut peer).await,
        Err(BridgeError::ConnectionClosed) | Err(BridgeError::Transport(_))
    ));

    // Second call is a no-op
    server.shutdown().await;
}

#[tokio::test]
async fn test_dropped_rcon_session_is_reestablished() {
    let (rcon, accepted) = flaky_rcon_target("secret").await;
    let server = assert_ok!(BridgeServer::start(server_config(Some(rcon))).await);
    let mut peer = connect_peer(server.local_addr()).await;
    let connected = format!("[RCON] Connected to {}", rcon);

    send(&mut peer, Frame::credentials("secret")).await;
    assert_eq!(recv_log(&mut peer).await, connected);

    send(&mut peer, Frame::command("say one")).await;
    let failed = recv_log(&mut peer).await;
    assert!(failed.starts_with("[RCON] Command failed"), "{}", failed);

    // No new credential from the peer: the server reconnects on its own
    let mut line = recv_log(&mut peer).await;
    while line != connected {
        line = recv_log(&mut peer).await;
    }
    assert!(server.rcon_connected());
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    send(&mut peer, Frame::command("say hi")).await;
    assert_eq!(recv_log(&mut peer).await, "[RCON Response] hi");

    server.shutdown().await;
}
