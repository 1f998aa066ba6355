//! Client, bridge server and a fake RCON target wired together

use rcon_bridge_client::{BridgeClient, InputOutcome, OperatorOutput};
use rcon_bridge_core::{ClientConfig, ServerConfig};
use rcon_bridge_server::BridgeServer;
use rcon_client::RconPacket;
use rcon_client::packet::{AUTH_FAILED_ID, packet_type, read_packet, write_packet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Default)]
struct Recorded {
    lines: Mutex<Vec<String>>,
}

impl Recorded {
    fn has_line(&self, wanted: &str) -> bool {
        self.lines.lock().unwrap().iter().any(|l| l == wanted)
    }
}

impl OperatorOutput for Recorded {
    fn print_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn notice(&self, _message: &str) {}
}

/// Accepts `secret` and answers `say X` with `X`
async fn fake_rcon_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                while let Ok(packet) = read_packet(&mut socket).await {
                    let reply = match packet.packet_type {
                        packet_type::AUTH => RconPacket {
                            id: if packet.body == "secret" {
                                packet.id
                            } else {
                                AUTH_FAILED_ID
                            },
                            packet_type: packet_type::EXEC_COMMAND,
                            body: String::new(),
                        },
                        _ => RconPacket {
                            id: packet.id,
                            packet_type: packet_type::RESPONSE_VALUE,
                            body: packet
                                .body
                                .strip_prefix("say ")
                                .unwrap_or_default()
                                .to_string(),
                        },
                    };
                    if write_packet(&mut socket, &reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_say_hi_round_trip() {
    let rcon = fake_rcon_target().await;
    let server = BridgeServer::start(ServerConfig {
        listen_host: "127.0.0.1".into(),
        listen_port: 0,
        rcon_host: rcon.ip().to_string(),
        rcon_port: rcon.port(),
        rcon_retry_interval_ms: 50,
        auth_timeout_ms: 2_000,
    })
    .await
    .unwrap();

    let output = Arc::new(Recorded::default());
    let client = BridgeClient::start(
        ClientConfig {
            server_host: "127.0.0.1".into(),
            server_port: server.local_addr().port(),
            rcon_password: "secret".into(),
            reconnect_delay_ms: 50,
            heartbeat_interval_ms: 100,
        },
        output.clone(),
    );

    let connected = format!("[RCON] Connected to {}", rcon);
    wait_until(|| output.has_line(&connected)).await;
    assert!(server.rcon_connected());

    assert_eq!(client.handle_input("say hi").await, InputOutcome::Sent);
    wait_until(|| output.has_line("[RCON Response] hi")).await;

    // Heartbeat PONGs never reach the operator
    wait_until(|| client.stats().heartbeats_sent >= 2).await;
    assert!(
        output
            .lines
            .lock()
            .unwrap()
            .iter()
            .all(|l| l.starts_with("[RCON"))
    );

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_client_reconnects_after_server_restart() {
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = reserved.local_addr().unwrap().port();
    drop(reserved);

    let server_config = ServerConfig {
        listen_host: "127.0.0.1".into(),
        listen_port: port,
        rcon_host: "127.0.0.1".into(),
        rcon_port: 1,
        rcon_retry_interval_ms: 1_000,
        auth_timeout_ms: 1_000,
    };

    let client = BridgeClient::start(
        ClientConfig {
            server_host: "127.0.0.1".into(),
            server_port: port,
            rcon_password: "secret".into(),
            reconnect_delay_ms: 20,
            heartbeat_interval_ms: 0,
        },
        Arc::new(Recorded::default()),
    );

    let server = BridgeServer::start(server_config.clone()).await.unwrap();
    wait_until(|| client.is_connected()).await;
    server.shutdown().await;
    wait_until(|| !client.is_connected()).await;

    let server = BridgeServer::start(server_config).await.unwrap();
    wait_until(|| client.stats().successful_connects >= 2).await;
    assert_eq!(client.stats().credential_sends, 2);

    client.shutdown().await;
    server.shutdown().await;
}
