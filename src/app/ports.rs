//! Port traits — the boundary between the API core and the platform.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ApiServer / ApiConnection / Scheduler
//! ```
//!
//! Driven adapters (sockets, entropy, persistent storage) implement these
//! traits.  The core consumes them as trait objects, so the protocol logic
//! never touches an OS handle directly and runs unchanged against the
//! in-memory mocks in `tests/`.
//!
//! ## Security notes
//!
//! - **StoragePort** implementations SHOULD encrypt the Noise PSK record.
//! - **RandomSource** only feeds scheduler jitter; Noise ephemeral keys come
//!   from the cipher resolver's own CSPRNG.
//! - Socket errors are surfaced as `std::io::Error` and mapped to
//!   [`ApiError`](crate::error::ApiError) by the frame layer.

use std::io::{self, IoSlice};

// ───────────────────────────────────────────────────────────────
// Stream socket (driven adapter: core ↔ TCP)
// ───────────────────────────────────────────────────────────────

/// A connected, byte-oriented stream.
///
/// Read and write must be non-blocking once [`set_nonblocking`] has been
/// called: when no progress is possible they return
/// `io::ErrorKind::WouldBlock`.  A read of 0 bytes means the peer closed.
///
/// [`set_nonblocking`]: Socket::set_nonblocking
pub trait Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Scatter/gather write.  May write a prefix of the concatenated slices.
    fn writev(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;

    fn set_nodelay(&mut self, nodelay: bool) -> io::Result<()>;

    /// Readiness hint from the platform's select loop.  Adapters without
    /// readiness tracking report `true` and let `read` return WouldBlock.
    fn ready(&self) -> bool {
        true
    }

    /// Printable peer address, e.g. `192.168.1.20:51234`.
    fn peer_name(&self) -> String;

    fn close(&mut self) -> io::Result<()>;

    fn shutdown(&mut self) -> io::Result<()>;
}

/// Non-blocking accept side.
pub trait Listener {
    /// `Ok(None)` when no connection is pending.
    fn accept(&mut self) -> io::Result<Option<Box<dyn Socket>>>;

    /// Bound local address for logging.
    fn local_name(&self) -> String;
}

// ───────────────────────────────────────────────────────────────
// Entropy (driven adapter: core ← platform RNG)
// ───────────────────────────────────────────────────────────────

/// Non-cryptographic random numbers for timer jitter.
pub trait RandomSource: Send + Sync {
    fn random_u32(&self) -> u32;

    /// Uniform in `[0, 1)`.
    fn random_float(&self) -> f32 {
        // 24 mantissa bits
        (self.random_u32() >> 8) as f32 / (1u32 << 24) as f32
    }
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: core ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage.  The API core stores exactly one record:
/// the active Noise PSK.
///
/// # Security
///
/// - Implementations SHOULD encrypt the PSK namespace at rest.
/// - Write operations MUST be atomic: no partial writes on power loss.
/// - Keys are namespaced to prevent collisions between subsystems.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full or the value exceeds the caller's buffer.
    Full,
    /// Generic I/O error.
    IoError,
    /// Stored record failed deserialization.
    Corrupted,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "record corrupted"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink (driving adapter: core → outside world)
// ───────────────────────────────────────────────────────────────

/// Receives structured events from the API core.
pub trait EventSink {
    fn emit(&mut self, event: super::events::ApiEvent);
}
