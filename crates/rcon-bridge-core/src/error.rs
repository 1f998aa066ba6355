//! Error types for rcon-bridge

use std::io;
use thiserror::Error;

/// Result type for rcon-bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// rcon-bridge error types
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Socket closed, reset or timed out
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or truncated frame/packet
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// RCON credential rejected by the target
    #[error("RCON authentication rejected: {0}")]
    AuthRejected(String),

    /// A second peer tried to connect while one is active
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Peer closed the stream cleanly on a frame boundary
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Operation requires a live connection
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// A retry loop was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration could not be loaded or saved
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Whether a retry loop should keep going after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::Transport(_)
                | BridgeError::AuthRejected(_)
                | BridgeError::ConnectionClosed
                | BridgeError::NotConnected(_)
                | BridgeError::ProtocolError(_)
        )
    }
}

impl From<io::Error> for BridgeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => {
                BridgeError::ProtocolError(format!("stream truncated: {}", err))
            }
            _ => BridgeError::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}
