//! Plaintext framing.
//!
//! ```text
//! ┌──────┬──────────────────┬──────────────────┬──────────────┐
//! │ 0x00 │ varint(len) 1-3B │ varint(type) 1-2B│ payload      │
//! └──────┴──────────────────┴──────────────────┴──────────────┘
//! ```
//!
//! The header is at most 6 bytes.  Outbound headers are written
//! right-aligned into the 6-byte padding reserved ahead of each payload,
//! so the frame is contiguous from `offset + 6 - header_len`.

use std::io::IoSlice;

use log::{debug, warn};

use super::{FrameCore, FrameHelper, FrameState, PacketInfo, ReadPacket};
use crate::app::ports::Socket;
use crate::error::{ApiError, DecodeError, Result};
use crate::proto::{encode_varint_to, parse_varint, varint_len};

/// Indicator + 3-byte size varint + 2-byte type varint.
pub const HEADER_PADDING: usize = 6;

/// Sent before dropping a peer whose first byte was not `0x00`.
const BAD_INDICATOR_REPLY: &[u8] = b"\x00Bad indicator byte";

const MAX_FIELD: u64 = u16::MAX as u64;

/// Receive state machine.
enum RxState {
    Header { buf: [u8; HEADER_PADDING], len: usize },
    Payload { message_type: u16, data: Vec<u8>, filled: usize },
}

impl RxState {
    fn idle() -> Self {
        Self::Header {
            buf: [0; HEADER_PADDING],
            len: 0,
        }
    }
}

/// Result of parsing the bytes collected so far.
enum HeaderParse {
    Incomplete,
    Done { size: usize, message_type: u16 },
}

fn parse_header(header: &[u8]) -> core::result::Result<HeaderParse, ApiError> {
    let (size, used) = match parse_varint(&header[1..]) {
        Ok(v) => v,
        Err(DecodeError::Truncated) => return Ok(HeaderParse::Incomplete),
        Err(_) => return Err(ApiError::BadDataPacket),
    };
    if size > MAX_FIELD {
        return Err(ApiError::BadDataPacket);
    }
    let (message_type, _) = match parse_varint(&header[1 + used..]) {
        Ok(v) => v,
        Err(DecodeError::Truncated) => return Ok(HeaderParse::Incomplete),
        Err(_) => return Err(ApiError::BadDataPacket),
    };
    if message_type > MAX_FIELD {
        return Err(ApiError::BadDataPacket);
    }
    Ok(HeaderParse::Done {
        size: size as usize,
        message_type: message_type as u16,
    })
}

pub struct PlaintextFrameHelper {
    core: FrameCore,
    rx: RxState,
}

impl PlaintextFrameHelper {
    pub fn new(socket: Box<dyn Socket>) -> Self {
        Self {
            core: FrameCore::new(socket),
            rx: RxState::idle(),
        }
    }

    fn fail(&mut self, err: ApiError) -> ApiError {
        self.core.state = FrameState::Failed;
        err
    }

    /// Pull bytes until one whole frame is buffered.
    fn try_read_frame(&mut self) -> Result<ReadPacket> {
        loop {
            match &mut self.rx {
                RxState::Header { buf, len } => {
                    // Three bytes covers the smallest header; after that go
                    // one byte at a time so nothing past the header is read.
                    let want = if *len < 3 { 3 - *len } else { 1 };
                    let start = *len;
                    let n = self.core.read(&mut buf[start..start + want])?;
                    if start == 0 && buf[0] != 0x00 {
                        debug!("{}: Bad indicator byte {:#04x}", self.core.peer(), buf[0]);
                        return Err(self.fail(ApiError::BadIndicator));
                    }
                    *len += n;
                    if *len < 3 {
                        continue;
                    }
                    match parse_header(&buf[..*len]) {
                        Ok(HeaderParse::Incomplete) if *len >= HEADER_PADDING => {
                            debug!("{}: Header overflow", self.core.peer());
                            return Err(self.fail(ApiError::BadDataPacket));
                        }
                        Ok(HeaderParse::Incomplete) => continue,
                        Ok(HeaderParse::Done { size, message_type }) => {
                            self.rx = RxState::Payload {
                                message_type,
                                data: vec![0; size],
                                filled: 0,
                            };
                        }
                        Err(e) => {
                            debug!("{}: Bad header varint", self.core.peer());
                            return Err(self.fail(e));
                        }
                    }
                }
                RxState::Payload {
                    message_type,
                    data,
                    filled,
                } => {
                    if *filled < data.len() {
                        let start = *filled;
                        let n = self.core.read(&mut data[start..])?;
                        *filled += n;
                        if *filled < data.len() {
                            return Err(ApiError::WouldBlock);
                        }
                    }
                    let packet = ReadPacket {
                        message_type: *message_type,
                        payload: core::mem::take(data),
                    };
                    self.rx = RxState::idle();
                    return Ok(packet);
                }
            }
        }
    }
}

impl FrameHelper for PlaintextFrameHelper {
    fn init(&mut self) -> Result<()> {
        self.core.init_common()?;
        self.core.state = FrameState::Data;
        Ok(())
    }

    fn poll(&mut self) -> Result<()> {
        if self.core.state != FrameState::Data {
            return Err(ApiError::BadState);
        }
        self.core.flush()
    }

    fn read_packet(&mut self) -> Result<ReadPacket> {
        if self.core.state != FrameState::Data {
            return Err(ApiError::WouldBlock);
        }
        match self.try_read_frame() {
            Err(ApiError::BadIndicator) => {
                // Best effort so the client logs a useful reason.
                if let Err(e) = self.core.write_raw(&[IoSlice::new(BAD_INDICATOR_REPLY)]) {
                    debug!("{}: Bad indicator reply not sent: {}", self.core.peer(), e);
                }
                Err(ApiError::BadIndicator)
            }
            other => other,
        }
    }

    fn write_protobuf_packet(&mut self, message_type: u8, buffer: &mut Vec<u8>) -> Result<()> {
        let payload_size = buffer
            .len()
            .checked_sub(HEADER_PADDING)
            .ok_or(ApiError::BadArg)?;
        let packet = PacketInfo {
            message_type,
            offset: 0,
            payload_size: u16::try_from(payload_size).map_err(|_| ApiError::BadArg)?,
        };
        self.write_protobuf_packets(buffer, &[packet])
    }

    fn write_protobuf_packets(&mut self, buffer: &mut Vec<u8>, packets: &[PacketInfo]) -> Result<()> {
        if self.core.state != FrameState::Data {
            return Err(ApiError::BadState);
        }
        if packets.is_empty() {
            return Ok(());
        }

        let mut ranges = Vec::with_capacity(packets.len());
        for p in packets {
            let offset = usize::from(p.offset);
            let payload = usize::from(p.payload_size);
            let end = offset + HEADER_PADDING + payload;
            if end > buffer.len() {
                warn!("{}: Packet exceeds buffer ({} > {})", self.core.peer(), end, buffer.len());
                return Err(ApiError::BadArg);
            }
            let size_len = varint_len(payload as u64);
            let type_len = varint_len(u64::from(p.message_type));
            let header_len = 1 + size_len + type_len;
            let start = offset + HEADER_PADDING - header_len;

            buffer[start] = 0x00;
            encode_varint_to(&mut buffer[start + 1..], payload as u64);
            encode_varint_to(&mut buffer[start + 1 + size_len..], u64::from(p.message_type));
            ranges.push(start..end);
        }

        let iov: Vec<IoSlice<'_>> = ranges.into_iter().map(|r| IoSlice::new(&buffer[r])).collect();
        self.core.write_raw(&iov)
    }

    fn frame_header_padding(&self) -> usize {
        HEADER_PADDING
    }

    fn frame_footer_size(&self) -> usize {
        0
    }

    fn state(&self) -> FrameState {
        self.core.state
    }

    fn core(&self) -> &FrameCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FrameCore {
        &mut self.core
    }
}
