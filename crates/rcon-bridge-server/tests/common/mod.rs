//! Shared fixtures: a fake RCON target and a scripted bridge peer

#![allow(dead_code)]

use rcon_bridge_core::{BridgeError, Frame, MessageType, ServerConfig, read_frame, write_frame};
use rcon_client::RconPacket;
use rcon_client::packet::{AUTH_FAILED_ID, packet_type, read_packet, write_packet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

/// RCON target accepting `password`; answers `say X` with `X`
pub async fn fake_rcon_target(password: &'static str) -> SocketAddr {
    serve_rcon(password, false).await.0
}

/// Like [`fake_rcon_target`], but the first session is cut on its first
/// command. Also returns the number of connections accepted so far.
pub async fn flaky_rcon_target(password: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    serve_rcon(password, true).await
}

async fn serve_rcon(
    password: &'static str,
    cut_first_session: bool,
) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let nth = counter.fetch_add(1, Ordering::SeqCst);
            let cut = cut_first_session && nth == 0;
            tokio::spawn(async move {
                while let Ok(packet) = read_packet(&mut socket).await {
                    let reply = if packet.packet_type == packet_type::AUTH {
                        RconPacket {
                            id: if packet.body == password {
                                packet.id
                            } else {
                                AUTH_FAILED_ID
                            },
                            packet_type: packet_type::EXEC_COMMAND,
                            body: String::new(),
                        }
                    } else if cut {
                        return;
                    } else {
                        RconPacket {
                            id: packet.id,
                            packet_type: packet_type::RESPONSE_VALUE,
                            body: packet
                                .body
                                .strip_prefix("say ")
                                .unwrap_or_default()
                                .to_string(),
                        }
                    };
                    if write_packet(&mut socket, &reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    (addr, accepted)
}

pub fn server_config(rcon: Option<SocketAddr>) -> ServerConfig {
    let rcon = rcon.unwrap_or_else(|| "127.0.0.1:1".parse().unwrap());
    ServerConfig {
        listen_host: "127.0.0.1".into(),
        listen_port: 0,
        rcon_host: rcon.ip().to_string(),
        rcon_port: rcon.port(),
        rcon_retry_interval_ms: 50,
        auth_timeout_ms: 2_000,
    }
}

pub async fn connect_peer(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

pub async fn send(stream: &mut TcpStream, frame: Frame) {
    write_frame(stream, &frame).await.unwrap();
}

pub async fn recv(stream: &mut TcpStream) -> Result<Frame, BridgeError> {
    timeout(WAIT, read_frame(stream))
        .await
        .expect("timed out waiting for a frame")
}

/// Next LOG payload, skipping keepalive acks
pub async fn recv_log(stream: &mut TcpStream) -> String {
    loop {
        let frame = recv(stream).await.unwrap();
        match frame.kind {
            MessageType::Log => return frame.payload,
            MessageType::Pong => continue,
            other => panic!("unexpected {:?} frame", other),
        }
    }
}

/// Poll `check` until it holds or the wait runs out
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
