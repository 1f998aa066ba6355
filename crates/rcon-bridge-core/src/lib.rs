//! # rcon-bridge-core
//!
//! Shared pieces of the rcon-bridge protocol:
//! - Length-prefixed frame codec for the bridge connection
//! - Error taxonomy used by every endpoint
//! - Server and client configuration

pub mod config;
pub mod error;
pub mod frame;

pub use config::{ClientConfig, ServerConfig};
pub use error::{BridgeError, Result};
pub use frame::{Frame, MessageType, read_frame, write_frame};
