//! Source RCON client
//!
//! Implements the Valve Source RCON protocol as spoken by Minecraft and
//! Source-engine servers: password authentication, command execution and
//! transparent reconnection.

mod client;
pub mod packet;

pub use client::{DEFAULT_AUTH_TIMEOUT, DEFAULT_RETRY_INTERVAL, RconClient};
pub use packet::{PacketType, RconPacket};
