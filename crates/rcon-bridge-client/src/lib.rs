//! # rcon-bridge-client
//!
//! The operator's end of the bridge. Dials the bridge server, keeps the
//! connection alive across failures, hands over the RCON password on every
//! connect and relays typed lines as console commands.

pub mod client;
pub mod output;

pub use client::{BridgeClient, ClientStats, InputOutcome};
pub use output::{ConsoleOutput, OperatorOutput};
