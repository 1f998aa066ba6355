//! # rcon-bridge-server
//!
//! Runs beside the game server. It:
//! - listens for exactly one remote console at a time
//! - opens the RCON session once the console supplies the password
//! - executes the console's commands over RCON and relays the output
//! - streams the game server's log lines to the console
//!
//! Log lines enter through [`LogSink`]; [`ForwardingLayer`], [`LogTailer`]
//! and [`capture_child_output`] are the provided producers.

pub mod backend;
pub mod capture;
pub mod layer;
pub mod server;
pub mod sink;
pub mod tail;

pub use backend::CommandBackend;
pub use capture::capture_child_output;
pub use layer::ForwardingLayer;
pub use server::{BridgeServer, NOTICE_PREFIX, RESPONSE_PREFIX};
pub use sink::{LogForwarder, LogSink};
pub use tail::LogTailer;
