//! `tracing` layer feeding a [`LogBuffer`]

use std::fmt::{self, Write};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use super::buffer::{LogBuffer, LogLevel};

/// Copies INFO and more severe events into a shared buffer
///
/// Messages render as `message key=value ...`.
#[derive(Debug, Clone)]
pub struct LogBufferLayer {
    buffer: Arc<LogBuffer>,
}

impl LogBufferLayer {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self { buffer }
    }
}

impl<S> Layer<S> for LogBufferLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = match *event.metadata().level() {
            Level::ERROR => LogLevel::Error,
            Level::WARN => LogLevel::Warn,
            Level::INFO => LogLevel::Info,
            _ => return,
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.buffer.push(level, visitor.finish());
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.record_debug(field, &format_args!("{}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={:?}", field.name(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[test]
    fn test_events_reach_buffer() {
        let buffer = Arc::new(LogBuffer::new());
        let subscriber = Registry::default().with(LogBufferLayer::new(Arc::clone(&buffer)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(stream = "cam1", "Stream created");
            tracing::warn!("Using default audio sample rate: 48kHz");
            tracing::error!(code = 7, "Segmenter write failed");
            tracing::debug!("not buffered");
        });

        let entries = buffer.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[0].message, "Stream created stream=cam1");
        assert_eq!(entries[1].message, "Using default audio sample rate: 48kHz");
        assert_eq!(entries[2].level, LogLevel::Error);
        assert_eq!(entries[2].message, "Segmenter write failed code=7");
    }
}
