//! The seam between the bridge server and the RCON session it drives

use async_trait::async_trait;
use rcon_bridge_core::{BridgeError, Result};
use rcon_client::RconClient;
use std::time::Duration;

/// Something that can execute console commands on the game server
///
/// All calls from the bridge server funnel through the single receive loop
/// or the single reconnect task, so implementations only need to serialize
/// those two paths against each other.
#[async_trait]
pub trait CommandBackend: Send + Sync + 'static {
    /// Human readable target, used in notices
    fn target(&self) -> String;

    /// Whether commands can be executed right now
    fn is_connected(&self) -> bool;

    /// Drop the current session and remember a new credential
    async fn reset(&self, password: String);

    /// Block until a session is established or the attempt is cancelled
    async fn connect_with_retry(
        &self,
        interval: Duration,
        on_failure: &mut (dyn for<'e> FnMut(&'e BridgeError) + Send),
    ) -> Result<()>;

    /// Execute one command on the live session, never reconnecting
    async fn execute(&self, command: &str) -> Result<String>;

    /// Close the session; safe to call repeatedly
    async fn disconnect(&self);
}

#[async_trait]
impl CommandBackend for RconClient {
    fn target(&self) -> String {
        self.address().to_string()
    }

    fn is_connected(&self) -> bool {
        RconClient::is_connected(self)
    }

    async fn reset(&self, password: String) {
        RconClient::disconnect(self).await;
        self.set_password(password).await;
    }

    async fn connect_with_retry(
        &self,
        interval: Duration,
        on_failure: &mut (dyn for<'e> FnMut(&'e BridgeError) + Send),
    ) -> Result<()> {
        self.connect_with_retry_observed(interval, |e| on_failure(e))
            .await
    }

    async fn execute(&self, command: &str) -> Result<String> {
        RconClient::execute(self, command).await
    }

    async fn disconnect(&self) {
        RconClient::disconnect(self).await
    }
}
