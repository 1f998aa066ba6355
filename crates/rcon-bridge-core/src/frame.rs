//! Wire codec for the bridge application protocol
//!
//! Every message on the bridge connection is one frame:
//!
//! ```text
//! [i32 BE: message type][i32 BE: payload length][payload: UTF-8 text]
//! ```
//!
//! The type values are deliberately distinct from RCON's own packet types;
//! the two protocols are layered, never mixed on the same socket.

use crate::error::{BridgeError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the fixed frame header (type + length)
pub const HEADER_LEN: usize = 8;

/// Upper bound on an accepted payload (16 MiB)
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Message type constants as they appear on the wire
pub mod message_type {
    pub const LOG: i32 = 1;
    pub const COMMAND: i32 = 2;
    pub const PING: i32 = 3;
    pub const PONG: i32 = 4;
    pub const RCON_CREDENTIALS: i32 = 5;
}

/// Kind of a bridge frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Server log line or RCON response text (server -> client)
    Log,
    /// Console command to execute over RCON (client -> server)
    Command,
    /// Keepalive request (client -> server)
    Ping,
    /// Keepalive ack (server -> client)
    Pong,
    /// RCON password the server should authenticate with (client -> server)
    RconCredentials,
    /// A type this build does not know; receivers ignore it
    Unknown(i32),
}

impl MessageType {
    /// Get the wire protocol value
    pub fn as_i32(self) -> i32 {
        match self {
            MessageType::Log => message_type::LOG,
            MessageType::Command => message_type::COMMAND,
            MessageType::Ping => message_type::PING,
            MessageType::Pong => message_type::PONG,
            MessageType::RconCredentials => message_type::RCON_CREDENTIALS,
            MessageType::Unknown(value) => value,
        }
    }

    /// Map a wire value back to a message type
    pub fn from_i32(value: i32) -> Self {
        match value {
            message_type::LOG => MessageType::Log,
            message_type::COMMAND => MessageType::Command,
            message_type::PING => MessageType::Ping,
            message_type::PONG => MessageType::Pong,
            message_type::RCON_CREDENTIALS => MessageType::RconCredentials,
            other => MessageType::Unknown(other),
        }
    }
}

/// A single application-protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageType,
    pub payload: String,
}

impl Frame {
    pub fn new(kind: MessageType, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn log(line: impl Into<String>) -> Self {
        Self::new(MessageType::Log, line)
    }

    pub fn command(command: impl Into<String>) -> Self {
        Self::new(MessageType::Command, command)
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping, "")
    }

    pub fn pong() -> Self {
        Self::new(MessageType::Pong, "")
    }

    pub fn credentials(password: impl Into<String>) -> Self {
        Self::new(MessageType::RconCredentials, password)
    }

    /// Serialize frame to bytes
    ///
    /// Payloads over [`MAX_PAYLOAD_LEN`] are refused here, since the
    /// receiving end would drop the connection on them.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = self.payload.as_bytes();
        let len = i32::try_from(payload.len())
            .ok()
            .filter(|_| payload.len() <= MAX_PAYLOAD_LEN)
            .ok_or_else(|| {
                BridgeError::ProtocolError(format!(
                    "payload too large to send: {} bytes",
                    payload.len()
                ))
            })?;

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&self.kind.as_i32().to_be_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(payload);
        Ok(buf)
    }

    /// Parse exactly one frame from a complete buffer
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(BridgeError::ProtocolError(format!(
                "frame header truncated: {} of {} bytes",
                data.len(),
                HEADER_LEN
            )));
        }

        let (kind, len) = parse_header(&data[..HEADER_LEN])?;
        let body = &data[HEADER_LEN..];
        if body.len() != len {
            return Err(BridgeError::ProtocolError(format!(
                "length mismatch: header says {} bytes, buffer has {}",
                len,
                body.len()
            )));
        }

        Ok(Self {
            kind,
            payload: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

fn parse_header(header: &[u8]) -> Result<(MessageType, usize)> {
    let kind = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let len = i32::from_be_bytes([header[4], header[5], header[6], header[7]]);

    if len < 0 {
        return Err(BridgeError::ProtocolError(format!(
            "negative payload length: {}",
            len
        )));
    }
    let len = len as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(BridgeError::ProtocolError(format!(
            "payload too large: {} bytes",
            len
        )));
    }

    Ok((MessageType::from_i32(kind), len))
}

/// Read one frame from a stream
///
/// A clean end-of-stream before the first header byte yields
/// [`BridgeError::ConnectionClosed`]; an end-of-stream anywhere inside the
/// frame yields [`BridgeError::ProtocolError`]. No partial-frame recovery is
/// attempted, callers tear the connection down on any error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                BridgeError::ConnectionClosed
            } else {
                BridgeError::ProtocolError(format!(
                    "stream truncated inside frame header after {} bytes",
                    filled
                ))
            });
        }
        filled += n;
    }

    let (kind, len) = parse_header(&header)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        BridgeError::ProtocolError(format!(
            "stream truncated inside {}-byte payload: {}",
            len, e
        ))
    })?;

    Ok(Frame {
        kind,
        payload: String::from_utf8_lossy(&payload).into_owned(),
    })
}

/// Write one frame to a stream and flush it
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = frame.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
