//! Unified error types for the Native API core.
//!
//! Frame helpers and the socket layer funnel every failure into a single
//! [`ApiError`] enum so the connection loop's error handling stays uniform.
//! All variants are `Copy`; the numeric codes match what the wire-side
//! tooling prints in diagnostics.

use core::fmt;

// ---------------------------------------------------------------------------
// Frame / socket errors
// ---------------------------------------------------------------------------

/// Every fallible frame-helper operation returns one of these.
///
/// [`ApiError::WouldBlock`] is the only non-fatal variant: the caller keeps
/// its state and retries on the next loop iteration.  Everything else moves
/// the helper to `FAILED` and the connection is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ApiError {
    WouldBlock = 1001,
    BadHandshakePacketLen = 1002,
    BadIndicator = 1003,
    BadDataPacket = 1004,
    TcpNodelayFailed = 1005,
    TcpNonblockingFailed = 1006,
    CloseFailed = 1007,
    ShutdownFailed = 1008,
    BadState = 1009,
    BadArg = 1010,
    SocketReadFailed = 1011,
    SocketWriteFailed = 1012,
    HandshakestateReadFailed = 1013,
    HandshakestateWriteFailed = 1014,
    HandshakestateBadState = 1015,
    CipherstateDecryptFailed = 1016,
    CipherstateEncryptFailed = 1017,
    OutOfMemory = 1018,
    HandshakestateSetupFailed = 1019,
    HandshakestateSplitFailed = 1020,
    BadHandshakeErrorByte = 1021,
    ConnectionClosed = 1022,
}

impl ApiError {
    /// Numeric diagnostic code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Upper-snake name used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WouldBlock => "WOULD_BLOCK",
            Self::BadHandshakePacketLen => "BAD_HANDSHAKE_PACKET_LEN",
            Self::BadIndicator => "BAD_INDICATOR",
            Self::BadDataPacket => "BAD_DATA_PACKET",
            Self::TcpNodelayFailed => "TCP_NODELAY_FAILED",
            Self::TcpNonblockingFailed => "TCP_NONBLOCKING_FAILED",
            Self::CloseFailed => "CLOSE_FAILED",
            Self::ShutdownFailed => "SHUTDOWN_FAILED",
            Self::BadState => "BAD_STATE",
            Self::BadArg => "BAD_ARG",
            Self::SocketReadFailed => "SOCKET_READ_FAILED",
            Self::SocketWriteFailed => "SOCKET_WRITE_FAILED",
            Self::HandshakestateReadFailed => "HANDSHAKESTATE_READ_FAILED",
            Self::HandshakestateWriteFailed => "HANDSHAKESTATE_WRITE_FAILED",
            Self::HandshakestateBadState => "HANDSHAKESTATE_BAD_STATE",
            Self::CipherstateDecryptFailed => "CIPHERSTATE_DECRYPT_FAILED",
            Self::CipherstateEncryptFailed => "CIPHERSTATE_ENCRYPT_FAILED",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::HandshakestateSetupFailed => "HANDSHAKESTATE_SETUP_FAILED",
            Self::HandshakestateSplitFailed => "HANDSHAKESTATE_SPLIT_FAILED",
            Self::BadHandshakeErrorByte => "BAD_HANDSHAKE_ERROR_BYTE",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
        }
    }

    /// `true` for the single transient variant.
    pub fn is_would_block(self) -> bool {
        matches!(self, Self::WouldBlock)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

/// Result alias for frame and socket operations.
pub type Result<T> = core::result::Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Protobuf decode errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended inside a field.
    Truncated,
    /// Varint longer than 10 bytes.
    BadVarint,
    /// Wire type 3/4 (groups) or 6/7.
    BadWireType(u8),
    /// Message type id with no decoder.
    UnknownMessage(u16),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated field"),
            Self::BadVarint => write!(f, "malformed varint"),
            Self::BadWireType(w) => write!(f, "unsupported wire type {w}"),
            Self::UnknownMessage(t) => write!(f, "unknown message type {t}"),
        }
    }
}
