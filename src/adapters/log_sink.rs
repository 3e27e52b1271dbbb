//! Log adapters.
//!
//! - [`LogEventSink`] implements [`EventSink`] by writing API events to
//!   the console log.
//! - [`ApiLogForwarder`] wraps `env_logger` and copies every accepted
//!   record into [`LOG_CHANNEL`] so the API server can stream it to
//!   clients with a log subscription.

use log::{Log, Metadata, Record, info};

use crate::app::events::{ApiEvent, LOG_CHANNEL, LOG_LINE_CAP, LogLine, wire_log_level};
use crate::app::ports::EventSink;

/// Adapter that logs every [`ApiEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: ApiEvent) {
        match event {
            ApiEvent::ClientConnected { name, peer } => {
                info!("CLIENT | connected {} ({})", name, peer);
            }
            ApiEvent::ClientDisconnected { name, peer } => {
                info!("CLIENT | disconnected {} ({})", name, peer);
            }
            ApiEvent::DumpConfig => info!("CONFIG | dump requested"),
            ApiEvent::Command(cmd) => info!("CMD | {:?}", cmd),
            ApiEvent::TimeSynced(epoch) => info!("TIME | synced epoch={}", epoch),
            ApiEvent::PskActivated => info!("NOISE | new PSK active"),
        }
    }
}

// ── Forwarding logger ─────────────────────────────────────────

/// `log` backend: console through `env_logger`, plus the API channel.
pub struct ApiLogForwarder {
    inner: env_logger::Logger,
}

impl ApiLogForwarder {
    pub fn new(inner: env_logger::Logger) -> Self {
        Self { inner }
    }

    /// Install as the global logger.
    pub fn init(self) -> Result<(), log::SetLoggerError> {
        let max = self.inner.filter();
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max);
        Ok(())
    }
}

impl Log for ApiLogForwarder {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);
        forward(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Queue `record` for subscribed clients.  Drops the line when the
/// channel is full.
pub fn forward(record: &Record<'_>) {
    let _ = LOG_CHANNEL.try_send(format_line(record));
}

fn format_line(record: &Record<'_>) -> LogLine {
    let text = format!("[{}]: {}", record.target(), record.args());
    let mut line = heapless::String::<LOG_LINE_CAP>::new();
    for c in text.chars() {
        if line.push(c).is_err() {
            break;
        }
    }
    LogLine {
        level: wire_log_level(record.level()),
        line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_lines_are_truncated_on_char_boundary() {
        let long = "é".repeat(LOG_LINE_CAP);
        let line = format_line(
            &Record::builder()
                .args(format_args!("{}", long))
                .level(log::Level::Warn)
                .target("api")
                .build(),
        );
        assert_eq!(line.level, 2);
        assert!(line.line.starts_with("[api]: é"));
        assert!(line.line.len() <= LOG_LINE_CAP);
    }

    #[test]
    fn event_sink_accepts_every_event() {
        let mut sink = LogEventSink::new();
        sink.emit(ApiEvent::DumpConfig);
        sink.emit(ApiEvent::TimeSynced(1));
        sink.emit(ApiEvent::PskActivated);
    }
}
