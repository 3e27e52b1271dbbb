//! API server configuration
//!
//! All tunable parameters for the Native API server.
//! Loaded from JSON by the host binary; the Noise PSK may later be
//! replaced at runtime and persisted separately through the storage port.

use serde::{Deserialize, Serialize};

/// Core API server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    // --- Listener ---
    /// TCP port
    pub port: u16,
    /// Maximum simultaneous client connections
    pub max_connections: u8,
    /// Accept burst limit (connections per second)
    pub max_accepts_per_sec: u32,

    // --- Identity ---
    /// Node name, sent in HelloResponse and the Noise server hello
    pub node_name: String,
    pub friendly_name: String,
    pub mac_address: String,
    /// Free-form server description for HelloResponse
    pub server_info: String,
    pub model: String,
    pub manufacturer: String,
    pub esphome_version: String,
    pub compilation_time: String,

    // --- Security ---
    /// Optional connection password (ConnectRequest)
    pub password: Option<String>,
    /// Optional base64 Noise PSK (32 bytes decoded)
    pub encryption_key: Option<String>,

    // --- Batching / backpressure ---
    /// Coalescing window for outbound messages (milliseconds)
    pub batch_delay_ms: u16,
    /// Inbound messages handled per connection per loop
    pub max_messages_per_loop: u8,
    /// Packets assembled per batch write
    pub max_packets_per_batch: u8,

    // --- Timing ---
    /// Time allowed to reach DATA after accept (milliseconds)
    pub handshake_timeout_ms: u32,
    /// Idle time before a keepalive ping (milliseconds)
    pub keepalive_ms: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            // Listener
            port: 6053,
            max_connections: 8,
            max_accepts_per_sec: 4,

            // Identity
            node_name: "native-api-node".into(),
            friendly_name: String::new(),
            mac_address: "00:00:00:00:00:00".into(),
            server_info: concat!("native-api-node (native-api v", env!("CARGO_PKG_VERSION"), ")").into(),
            model: "host".into(),
            manufacturer: "Espressif".into(),
            esphome_version: env!("CARGO_PKG_VERSION").into(),
            compilation_time: String::new(),

            // Security
            password: None,
            encryption_key: None,

            // Batching
            batch_delay_ms: 100,
            max_messages_per_loop: 5,
            max_packets_per_batch: 64,

            // Timing
            handshake_timeout_ms: 10_000, // 10 s
            keepalive_ms: 60_000,         // 1/min
        }
    }
}

/// A configuration value outside its accepted range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    EmptyNodeName,
    ZeroPort,
    ZeroMessagesPerLoop,
    ZeroPacketsPerBatch,
    KeepaliveTooShort,
    HandshakeTimeoutTooShort,
    ZeroConnections,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::EmptyNodeName => write!(f, "node_name must not be empty"),
            Self::ZeroPort => write!(f, "port must be non-zero"),
            Self::ZeroMessagesPerLoop => write!(f, "max_messages_per_loop must be at least 1"),
            Self::ZeroPacketsPerBatch => write!(f, "max_packets_per_batch must be at least 1"),
            Self::KeepaliveTooShort => write!(f, "keepalive_ms must be at least 1000"),
            Self::HandshakeTimeoutTooShort => write!(f, "handshake_timeout_ms must be at least 100"),
            Self::ZeroConnections => write!(f, "max_connections must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ApiConfig {
    /// Range-check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_name.is_empty() {
            return Err(ConfigError::EmptyNodeName);
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }
        if self.max_messages_per_loop == 0 {
            return Err(ConfigError::ZeroMessagesPerLoop);
        }
        if self.max_packets_per_batch == 0 {
            return Err(ConfigError::ZeroPacketsPerBatch);
        }
        if self.keepalive_ms < 1_000 {
            return Err(ConfigError::KeepaliveTooShort);
        }
        if self.handshake_timeout_ms < 100 {
            return Err(ConfigError::HandshakeTimeoutTooShort);
        }
        Ok(())
    }

    /// Dead-peer threshold: 2.5 keepalive periods.
    pub fn keepalive_disconnect_ms(&self) -> u32 {
        self.keepalive_ms.saturating_mul(5) / 2
    }

    pub fn uses_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}
