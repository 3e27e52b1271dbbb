//! Outbound application events.
//!
//! The API server emits these into the [`Context`](super::Context)
//! through the [`EventSink`](super::ports::EventSink) port.  The host
//! drains them each loop and decides what to do: log, drive hardware
//! for an entity command, or dump configuration.
//!
//! Log lines travel the other way through [`LOG_CHANNEL`]: the logger
//! pushes, the server drains and forwards to subscribed clients.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::entity::EntityCommand;

/// Structured events emitted by the API core.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiEvent {
    /// A client completed authentication.
    ClientConnected { name: String, peer: String },

    /// An authenticated client went away.
    ClientDisconnected { name: String, peer: String },

    /// A client asked for a configuration dump with its log subscription.
    DumpConfig,

    /// A client sent a command for an entity.
    Command(EntityCommand),

    /// A client told us the wall-clock time.
    TimeSynced(u32),

    /// A new Noise PSK became active.
    PskActivated,
}

// ── Log forwarding channel ────────────────────────────────────

/// Longest forwarded log line; longer lines are truncated.
pub const LOG_LINE_CAP: usize = 256;

/// Channel depth for forwarded log lines.
const LOG_DEPTH: usize = 32;

/// One formatted log record bound for subscribed clients.
#[derive(Debug, Clone)]
pub struct LogLine {
    /// Wire level: error=1, warn=2, info=3, debug=5, trace=6.
    pub level: u8,
    pub line: heapless::String<LOG_LINE_CAP>,
}

/// Logger → API server.  Full channel drops the newest line.
pub static LOG_CHANNEL: Channel<CriticalSectionRawMutex, LogLine, LOG_DEPTH> = Channel::new();

/// Map a `log` level onto the wire level.
pub fn wire_log_level(level: log::Level) -> u8 {
    match level {
        log::Level::Error => 1,
        log::Level::Warn => 2,
        log::Level::Info => 3,
        log::Level::Debug => 5,
        log::Level::Trace => 6,
    }
}
