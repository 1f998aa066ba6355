//! Log line hand-off from log producers to the bridge server
//!
//! Producers (tracing layer, file tailer, child process capture) never touch
//! the peer socket themselves. They push lines into a [`LogSink`]; the
//! server's forwarding task drains them and writes each one to the active
//! peer, or drops it when nobody is connected.

use tokio::sync::mpsc;

/// Lines buffered between a producer and the forwarding task before new
/// lines are dropped
pub const SINK_CAPACITY: usize = 1024;

/// Destination for captured log lines
pub trait LogSink: Send + Sync {
    /// Hand one line over for forwarding; must never block
    fn forward_line(&self, line: &str);
}

/// Channel-backed [`LogSink`] handed out by the bridge server
#[derive(Clone)]
pub struct LogForwarder {
    tx: mpsc::Sender<String>,
}

impl LogForwarder {
    /// Create a forwarder and the receiver the server drains
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        (Self { tx }, rx)
    }
}

impl LogSink for LogForwarder {
    fn forward_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        // Full or closed: drop, log forwarding is best effort
        let _ = self.tx.try_send(line.to_string());
    }
}

impl<S: LogSink + ?Sized> LogSink for std::sync::Arc<S> {
    fn forward_line(&self, line: &str) {
        (**self).forward_line(line)
    }
}
