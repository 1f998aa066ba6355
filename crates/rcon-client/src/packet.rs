//! Source RCON packet codec
//!
//! Protocol reference: https://developer.valvesoftware.com/wiki/Source_RCON_Protocol
//!
//! ```text
//! [i32 LE: size][i32 LE: request id][i32 LE: type][body][0x00][0x00]
//! ```
//!
//! `size` counts everything after itself.

use rcon_bridge_core::{BridgeError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Smallest legal size: id + type + two terminators
pub const MIN_PACKET_SIZE: usize = 10;

/// Largest size we accept from a server (64 KiB)
pub const MAX_PACKET_SIZE: usize = 64 * 1024;

/// Request id the server answers with when auth is rejected
pub const AUTH_FAILED_ID: i32 = -1;

/// Raw `type` field values
pub mod packet_type {
    /// Command output; also the empty packet some servers send before an auth verdict
    pub const RESPONSE_VALUE: i32 = 0;
    /// Sent as a command request; received as the auth verdict
    pub const EXEC_COMMAND: i32 = 2;
    pub const AUTH: i32 = 3;
}

/// id + type fields
const FIELDS_LEN: usize = 8;

/// Body terminator plus the empty trailing string
const TERMINATOR: [u8; 2] = [0, 0];

/// Requests a client can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PacketType {
    Auth = packet_type::AUTH,
    ExecCommand = packet_type::EXEC_COMMAND,
}

impl PacketType {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// One RCON packet; `packet_type` stays raw since replies reuse request codes
#[derive(Debug, Clone, PartialEq)]
pub struct RconPacket {
    pub id: i32,
    pub packet_type: i32,
    pub body: String,
}

impl RconPacket {
    pub fn new(id: i32, packet_type: PacketType, body: impl Into<String>) -> Self {
        Self {
            id,
            packet_type: packet_type.as_i32(),
            body: body.into(),
        }
    }

    /// Wire form including the size prefix
    ///
    /// A body that would push the packet past [`MAX_PACKET_SIZE`] is refused.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = self.body.as_bytes();
        let size = FIELDS_LEN + body.len() + TERMINATOR.len();
        if size > MAX_PACKET_SIZE {
            return Err(BridgeError::ProtocolError(format!(
                "RCON command too large: {} bytes",
                body.len()
            )));
        }
        let size = i32::try_from(size)
            .map_err(|_| BridgeError::ProtocolError(format!("RCON size overflow: {}", size)))?;

        let mut buf = Vec::with_capacity(4 + FIELDS_LEN + body.len() + TERMINATOR.len());
        for field in [size, self.id, self.packet_type] {
            buf.extend_from_slice(&field.to_le_bytes());
        }
        buf.extend_from_slice(body);
        buf.extend_from_slice(&TERMINATOR);
        Ok(buf)
    }

    /// Parse the bytes that follow the size prefix
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_PACKET_SIZE {
            return Err(BridgeError::ProtocolError(format!(
                "RCON packet too short: {} bytes",
                data.len()
            )));
        }

        let (fields, rest) = data.split_at(FIELDS_LEN);
        let body = rest.split(|&b| b == 0).next().unwrap_or(&[]);

        Ok(Self {
            id: le_i32(&fields[..4]),
            packet_type: le_i32(&fields[4..]),
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }

    /// Whether this is the server's verdict on a rejected password
    pub fn is_auth_failure(&self) -> bool {
        self.id == AUTH_FAILED_ID
    }
}

fn le_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Write a packet and flush
pub async fn write_packet<W>(stream: &mut W, packet: &RconPacket) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = packet.to_bytes()?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Read exactly one packet
pub async fn read_packet<R>(stream: &mut R) -> Result<RconPacket>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut size_buf = [0u8; 4];
    stream.read_exact(&mut size_buf).await?;
    let size = i32::from_le_bytes(size_buf);

    let size = usize::try_from(size)
        .ok()
        .filter(|n| (MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(n))
        .ok_or_else(|| {
            BridgeError::ProtocolError(format!("RCON packet size out of range: {}", size))
        })?;

    let mut data = vec![0u8; size];
    stream.read_exact(&mut data).await?;

    RconPacket::from_bytes(&data)
}
