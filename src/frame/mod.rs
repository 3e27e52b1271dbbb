//! Frame helpers — non-blocking framed I/O over a stream socket.
//!
//! Two wire variants share one contract ([`FrameHelper`]):
//!
//! ```text
//! plaintext  ┌──────┬──────────────┬──────────────┬─────────────┐
//!            │ 0x00 │ varint(size) │ varint(type) │ payload     │
//!            └──────┴──────────────┴──────────────┴─────────────┘
//! noise      ┌──────┬──────────────┬────────────────────────────────────┐
//!            │ 0x01 │ u16be(size)  │ AEAD{ u16be type, u16be len, data }│
//!            └──────┴──────────────┴────────────────────────────────────┘
//! ```
//!
//! Outbound messages are encoded by the caller into a shared buffer laid
//! out as `[header padding | payload | footer]` per message; the helper
//! fills the header backwards from the payload start, so no copy is
//! needed before the scatter/gather write.  Bytes the socket does not
//! accept are copied into a per-connection send queue ([`FrameCore`]) and
//! drained by [`FrameHelper::poll`].

pub mod noise;
pub mod plaintext;

use std::collections::VecDeque;
use std::io::{self, IoSlice};

use log::{debug, warn};

use crate::app::ports::Socket;
use crate::error::{ApiError, Result};

pub use noise::{NoiseContext, NoiseFrameHelper};
pub use plaintext::PlaintextFrameHelper;

/// Helper lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameState {
    Initialize = 1,
    ClientHello = 2,
    ServerHello = 3,
    Handshake = 4,
    Data = 5,
    Closed = 6,
    Failed = 7,
    /// Only while writing a final handshake error frame.
    ExplicitReject = 8,
}

/// Where one encoded message lives in the shared buffer.
///
/// `offset` points at the start of the message's header padding; the
/// payload begins `frame_header_padding()` bytes later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    pub message_type: u8,
    pub offset: u16,
    pub payload_size: u16,
}

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPacket {
    pub message_type: u16,
    pub payload: Vec<u8>,
}

/// Framing contract shared by the plaintext and Noise variants.
pub trait FrameHelper {
    /// Configure the socket and enter the first protocol state.
    fn init(&mut self) -> Result<()>;

    /// Drive any pending handshake step and flush buffered output.
    fn poll(&mut self) -> Result<()>;

    /// Read one complete message.  `WouldBlock` when none is available yet.
    fn read_packet(&mut self) -> Result<ReadPacket>;

    /// Frame and send the single message held in `buffer`
    /// (`[padding | payload]`).
    fn write_protobuf_packet(&mut self, message_type: u8, buffer: &mut Vec<u8>) -> Result<()>;

    /// Frame every packet in `buffer` and submit them with one vectored write.
    fn write_protobuf_packets(&mut self, buffer: &mut Vec<u8>, packets: &[PacketInfo]) -> Result<()>;

    fn frame_header_padding(&self) -> usize;

    fn frame_footer_size(&self) -> usize;

    fn state(&self) -> FrameState;

    fn core(&self) -> &FrameCore;

    fn core_mut(&mut self) -> &mut FrameCore;

    /// `true` when the helper is in DATA and nothing is queued.
    fn can_write_without_blocking(&self) -> bool {
        self.state() == FrameState::Data && self.core().tx_buf.is_empty()
    }

    fn is_socket_ready(&self) -> bool {
        self.core().socket.ready()
    }

    fn peer_name(&self) -> &str {
        &self.core().peer
    }

    fn close(&mut self) -> Result<()> {
        self.core_mut().close()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.core_mut().shutdown()
    }
}

// ───────────────────────────────────────────────────────────────
// Shared socket plumbing
// ───────────────────────────────────────────────────────────────

/// Unsent suffix of a write.
#[derive(Debug)]
struct SendBuffer {
    data: Vec<u8>,
    offset: usize,
}

impl SendBuffer {
    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }
}

/// Socket ownership, state, and write buffering common to both helpers.
pub struct FrameCore {
    socket: Box<dyn Socket>,
    tx_buf: VecDeque<SendBuffer>,
    pub(crate) state: FrameState,
    peer: String,
}

impl FrameCore {
    pub fn new(socket: Box<dyn Socket>) -> Self {
        let peer = socket.peer_name();
        Self {
            socket,
            tx_buf: VecDeque::new(),
            state: FrameState::Initialize,
            peer,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Bytes waiting in the send queue.
    pub fn pending_bytes(&self) -> usize {
        self.tx_buf.iter().map(|b| b.remaining().len()).sum()
    }

    pub(crate) fn init_common(&mut self) -> Result<()> {
        if self.state != FrameState::Initialize {
            debug!("{}: Bad state for init {:?}", self.peer, self.state);
            return Err(ApiError::BadState);
        }
        if let Err(e) = self.socket.set_nonblocking(true) {
            self.state = FrameState::Failed;
            warn!("{}: Setting nonblocking failed: {}", self.peer, e);
            return Err(ApiError::TcpNonblockingFailed);
        }
        if let Err(e) = self.socket.set_nodelay(true) {
            self.state = FrameState::Failed;
            warn!("{}: Setting nodelay failed: {}", self.peer, e);
            return Err(ApiError::TcpNodelayFailed);
        }
        Ok(())
    }

    /// Read into `buf`, mapping socket outcomes onto the error taxonomy.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.socket.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.state = FrameState::Failed;
                debug!("{}: Connection closed", self.peer);
                Err(ApiError::ConnectionClosed)
            }
            Ok(n) => Ok(n),
            Err(e) if is_transient(&e) => Err(ApiError::WouldBlock),
            Err(e) => {
                self.state = FrameState::Failed;
                debug!("{}: Socket read failed: {}", self.peer, e);
                Err(ApiError::SocketReadFailed)
            }
        }
    }

    /// Write all of `iov` or queue whatever the socket did not take.
    ///
    /// Queued bytes always go out before new ones: if the queue cannot be
    /// emptied first, the whole of `iov` is queued behind it.
    pub(crate) fn write_raw(&mut self, iov: &[IoSlice<'_>]) -> Result<()> {
        let total: usize = iov.iter().map(|s| s.len()).sum();
        if total == 0 {
            return Ok(());
        }

        if !self.tx_buf.is_empty() {
            match self.try_send_tx_buf() {
                Ok(()) | Err(ApiError::WouldBlock) => {}
                Err(e) => return Err(e),
            }
            if !self.tx_buf.is_empty() {
                self.enqueue(iov, 0);
                return Ok(());
            }
        }

        match self.socket.writev(iov) {
            Ok(sent) if sent >= total => Ok(()),
            Ok(sent) => {
                self.enqueue(iov, sent);
                Ok(())
            }
            Err(e) if is_transient(&e) => {
                self.enqueue(iov, 0);
                Ok(())
            }
            Err(e) => {
                self.state = FrameState::Failed;
                warn!("{}: Socket write failed: {}", self.peer, e);
                Err(ApiError::SocketWriteFailed)
            }
        }
    }

    /// Copy everything in `iov` past the first `skip` bytes into the queue.
    fn enqueue(&mut self, iov: &[IoSlice<'_>], mut skip: usize) {
        let mut data = Vec::new();
        for slice in iov {
            if skip >= slice.len() {
                skip -= slice.len();
                continue;
            }
            data.extend_from_slice(&slice[skip..]);
            skip = 0;
        }
        if !data.is_empty() {
            self.tx_buf.push_back(SendBuffer { data, offset: 0 });
        }
    }

    pub(crate) fn try_send_tx_buf(&mut self) -> Result<()> {
        while let Some(front) = self.tx_buf.front_mut() {
            match self.socket.writev(&[IoSlice::new(front.remaining())]) {
                Ok(0) => return Err(ApiError::WouldBlock),
                Ok(sent) => {
                    front.offset += sent;
                    if front.remaining().is_empty() {
                        self.tx_buf.pop_front();
                    } else {
                        return Err(ApiError::WouldBlock);
                    }
                }
                Err(e) if is_transient(&e) => return Err(ApiError::WouldBlock),
                Err(e) => {
                    self.state = FrameState::Failed;
                    warn!("{}: Socket write failed: {}", self.peer, e);
                    return Err(ApiError::SocketWriteFailed);
                }
            }
        }
        Ok(())
    }

    /// Drain the send queue; a blocked socket is not an error here.
    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.tx_buf.is_empty() {
            return Ok(());
        }
        match self.try_send_tx_buf() {
            Ok(()) | Err(ApiError::WouldBlock) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Close the socket.  Repeated calls are no-ops.
    pub(crate) fn close(&mut self) -> Result<()> {
        if self.state == FrameState::Closed {
            return Ok(());
        }
        self.state = FrameState::Closed;
        self.socket.close().map_err(|_| ApiError::CloseFailed)
    }

    pub(crate) fn shutdown(&mut self) -> Result<()> {
        self.socket.shutdown().map_err(|_| ApiError::ShutdownFailed)
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
