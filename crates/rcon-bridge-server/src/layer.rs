//! tracing layer that copies log events to the remote console
//!
//! Installed next to the normal fmt layer of the host process, it renders
//! every event as `[LEVEL] message` and hands it to a [`LogSink`]. The sink
//! is non-blocking, so `on_event` never waits on the network.

use crate::sink::LogSink;
use std::fmt::{self, Write};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// A tracing layer forwarding formatted events to a [`LogSink`]
pub struct ForwardingLayer<S> {
    sink: S,
    max_level: Level,
}

impl<S: LogSink> ForwardingLayer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            max_level: Level::INFO,
        }
    }

    /// Most verbose level that still gets forwarded (default INFO)
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }
}

impl<S, Sub> Layer<Sub> for ForwardingLayer<S>
where
    S: LogSink + 'static,
    Sub: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, Sub>) {
        let metadata = event.metadata();
        if *metadata.level() > self.max_level {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.finish();
        if message.trim().is_empty() {
            return;
        }

        self.sink
            .forward_line(&format!("[{}] {}", metadata.level(), message));
    }
}

/// Collects the `message` field and the remaining fields separately so the
/// output does not depend on the order tracing records them in
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push_str(", ");
        }
        let _ = write!(self.fields, "{}={:?}", field.name(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<String>>>);

    impl LogSink for Captured {
        fn forward_line(&self, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn test_events_are_prefixed_with_level() {
        let captured = Captured::default();
        let subscriber =
            tracing_subscriber::registry().with(ForwardingLayer::new(captured.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Done (4.2s)! For help, type \"help\"");
            tracing::warn!(player = "Steve", "moved too quickly");
            tracing::debug!("not forwarded at INFO");
        });

        let lines = captured.0.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                "[INFO] Done (4.2s)! For help, type \"help\"".to_string(),
                "[WARN] moved too quickly player=\"Steve\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_max_level_can_include_debug() {
        let captured = Captured::default();
        let layer = ForwardingLayer::new(captured.clone()).with_max_level(Level::DEBUG);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("chunk saved");
            tracing::trace!("too chatty");
        });

        assert_eq!(
            *captured.0.lock().unwrap(),
            vec!["[DEBUG] chunk saved".to_string()]
        );
    }
}
