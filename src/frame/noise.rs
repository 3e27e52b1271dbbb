//! Noise framing — `Noise_NNpsk0_25519_ChaChaPoly_SHA256`, server as responder.
//!
//! ## Handshake sequence
//!
//! ```text
//!  client                                   server
//!    │── frame(client hello, ignored) ──────▶│  prologue += len ‖ frame
//!    │◀─ frame(0x01 ‖ name ‖ 0 ‖ mac ‖ 0) ───│  server hello
//!    │── frame(0x00 ‖ noise msg 1) ─────────▶│  e, psk
//!    │◀─ frame(0x00 ‖ noise msg 2) ──────────│  e, ee     ──▶ DATA
//! ```
//!
//! Every frame is `0x01 ‖ u16be(len) ‖ body`; handshake bodies are capped
//! at 128 bytes.  In DATA the body is one AEAD message whose plaintext is
//! `u16be(type) ‖ u16be(len) ‖ payload`.
//!
//! Handshake failures the client can understand are answered with an
//! explicit reject frame `0x01 ‖ reason` before the connection drops.

use std::cell::Cell;
use std::io::IoSlice;
use std::sync::Arc;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use log::{debug, warn};

use super::{FrameCore, FrameHelper, FrameState, PacketInfo, ReadPacket};
use crate::app::ports::Socket;
use crate::error::{ApiError, Result};

pub const NOISE_PARAMS: &str = "Noise_NNpsk0_25519_ChaChaPoly_SHA256";

/// Indicator + u16be size + u16be type + u16be length.
pub const HEADER_PADDING: usize = 7;

/// AEAD tag.
pub const FOOTER_SIZE: usize = 16;

pub const PSK_LEN: usize = 32;

/// Max frame body before the handshake completes.
const MAX_HANDSHAKE_FRAME: usize = 128;

const PROLOGUE_INIT: &[u8] = b"NoiseAPIInit";

/// Selected protocol byte in the server hello.
const PROTOCOL_NOISE: u8 = 0x01;

const HANDSHAKE_MSG_MAX: usize = 64;

// ───────────────────────────────────────────────────────────────
// Shared context
// ───────────────────────────────────────────────────────────────

/// Process-wide Noise settings shared by the server and every helper.
///
/// The PSK may be swapped at runtime; helpers read it when their
/// handshake starts, so established sessions are unaffected.
pub struct NoiseContext {
    psk: CriticalSectionMutex<Cell<Option<[u8; PSK_LEN]>>>,
    server_name: String,
    mac_address: String,
}

impl NoiseContext {
    pub fn new(server_name: impl Into<String>, mac_address: impl Into<String>) -> Self {
        Self {
            psk: CriticalSectionMutex::new(Cell::new(None)),
            server_name: server_name.into(),
            mac_address: mac_address.into(),
        }
    }

    pub fn set_psk(&self, psk: [u8; PSK_LEN]) {
        self.psk.lock(|cell| cell.set(Some(psk)));
    }

    pub fn clear_psk(&self) {
        self.psk.lock(|cell| cell.set(None));
    }

    pub fn psk(&self) -> Option<[u8; PSK_LEN]> {
        self.psk.lock(|cell| cell.get())
    }

    pub fn has_psk(&self) -> bool {
        self.psk().is_some()
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn mac_address(&self) -> &str {
        &self.mac_address
    }
}

// ───────────────────────────────────────────────────────────────
// Helper
// ───────────────────────────────────────────────────────────────

struct NoiseRx {
    header: [u8; 3],
    header_len: usize,
    body: Vec<u8>,
    body_len: usize,
}

impl NoiseRx {
    fn new() -> Self {
        Self {
            header: [0; 3],
            header_len: 0,
            body: Vec::new(),
            body_len: 0,
        }
    }
}

pub struct NoiseFrameHelper {
    core: FrameCore,
    ctx: Arc<NoiseContext>,
    prologue: Vec<u8>,
    handshake: Option<snow::HandshakeState>,
    transport: Option<snow::TransportState>,
    rx: NoiseRx,
}

impl NoiseFrameHelper {
    pub fn new(socket: Box<dyn Socket>, ctx: Arc<NoiseContext>) -> Self {
        Self {
            core: FrameCore::new(socket),
            ctx,
            prologue: Vec::new(),
            handshake: None,
            transport: None,
            rx: NoiseRx::new(),
        }
    }

    fn fail(&mut self, err: ApiError) -> ApiError {
        self.core.state = FrameState::Failed;
        err
    }

    /// Read one `0x01 ‖ u16be(len) ‖ body` frame.
    fn try_read_frame(&mut self) -> Result<Vec<u8>> {
        if self.rx.header_len < 3 {
            let start = self.rx.header_len;
            let n = self.core.read(&mut self.rx.header[start..])?;
            self.rx.header_len += n;
            if self.rx.header_len < 3 {
                return Err(ApiError::WouldBlock);
            }
            if self.rx.header[0] != 0x01 {
                debug!("{}: Bad indicator byte {:#04x}", self.core.peer(), self.rx.header[0]);
                return Err(self.fail(ApiError::BadIndicator));
            }
            let size = usize::from(u16::from_be_bytes([self.rx.header[1], self.rx.header[2]]));
            if self.core.state != FrameState::Data && size > MAX_HANDSHAKE_FRAME {
                debug!("{}: Bad packet len for handshake: {}", self.core.peer(), size);
                return Err(self.fail(ApiError::BadHandshakePacketLen));
            }
            self.rx.body = vec![0; size];
            self.rx.body_len = 0;
        }

        if self.rx.body_len < self.rx.body.len() {
            let start = self.rx.body_len;
            let n = self.core.read(&mut self.rx.body[start..])?;
            self.rx.body_len += n;
            if self.rx.body_len < self.rx.body.len() {
                return Err(ApiError::WouldBlock);
            }
        }

        let frame = core::mem::take(&mut self.rx.body);
        self.rx = NoiseRx::new();
        Ok(frame)
    }

    fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        let len = u16::try_from(data.len()).map_err(|_| ApiError::BadArg)?;
        let [hi, lo] = len.to_be_bytes();
        let header = [0x01, hi, lo];
        self.core.write_raw(&[IoSlice::new(&header), IoSlice::new(data)])
    }

    /// Tell the client why the handshake ended.  Best effort.
    fn send_explicit_handshake_reject(&mut self, reason: &str) {
        let mut data = Vec::with_capacity(1 + reason.len());
        data.push(0x01);
        data.extend_from_slice(reason.as_bytes());

        let orig = self.core.state;
        self.core.state = FrameState::ExplicitReject;
        if let Err(e) = self.write_frame(&data) {
            debug!("{}: Reject frame not sent: {}", self.core.peer(), e);
        }
        self.core.state = orig;
    }

    fn handle_handshake_frame_error(&mut self, err: ApiError) -> ApiError {
        match err {
            ApiError::BadIndicator => self.send_explicit_handshake_reject("Bad indicator byte"),
            ApiError::BadHandshakePacketLen => {
                self.send_explicit_handshake_reject("Bad handshake packet len")
            }
            _ => {}
        }
        err
    }

    fn init_handshake(&mut self) -> Result<()> {
        let prologue = core::mem::take(&mut self.prologue);
        let Some(psk) = self.ctx.psk() else {
            warn!("{}: No PSK configured", self.core.peer());
            return Err(self.fail(ApiError::HandshakestateSetupFailed));
        };
        let params: snow::params::NoiseParams = match NOISE_PARAMS.parse() {
            Ok(p) => p,
            Err(e) => {
                warn!("{}: Bad noise params: {}", self.core.peer(), e);
                return Err(self.fail(ApiError::HandshakestateSetupFailed));
            }
        };
        let built = snow::Builder::new(params)
            .psk(0, &psk)
            .and_then(|b| b.prologue(&prologue))
            .and_then(|b| b.build_responder());
        match built {
            Ok(hs) => {
                self.handshake = Some(hs);
                Ok(())
            }
            Err(e) => {
                warn!("{}: Handshake setup failed: {}", self.core.peer(), e);
                Err(self.fail(ApiError::HandshakestateSetupFailed))
            }
        }
    }

    fn check_handshake_finished(&mut self) -> Result<()> {
        let finished = self
            .handshake
            .as_ref()
            .is_some_and(|hs| hs.is_handshake_finished());
        if !finished {
            return Ok(());
        }
        let Some(hs) = self.handshake.take() else {
            return Ok(());
        };
        match hs.into_transport_mode() {
            Ok(transport) => {
                self.transport = Some(transport);
                self.core.state = FrameState::Data;
                debug!("{}: Handshake complete", self.core.peer());
                Ok(())
            }
            Err(e) => {
                warn!("{}: Split failed: {}", self.core.peer(), e);
                Err(self.fail(ApiError::HandshakestateSplitFailed))
            }
        }
    }

    fn handshake_step(&mut self) -> Result<()> {
        let my_turn = match self.handshake.as_ref() {
            Some(hs) => hs.is_my_turn(),
            None => return Err(self.fail(ApiError::HandshakestateBadState)),
        };

        if !my_turn {
            let frame = self
                .try_read_frame()
                .map_err(|e| self.handle_handshake_frame_error(e))?;
            if frame.is_empty() {
                self.send_explicit_handshake_reject("Empty handshake message");
                return Err(self.fail(ApiError::BadHandshakeErrorByte));
            }
            if frame[0] != 0x00 {
                debug!("{}: Bad handshake error byte {}", self.core.peer(), frame[0]);
                self.send_explicit_handshake_reject("Bad handshake error byte");
                return Err(self.fail(ApiError::BadHandshakeErrorByte));
            }
            let mut payload = [0u8; MAX_HANDSHAKE_FRAME];
            let result = match self.handshake.as_mut() {
                Some(hs) => hs.read_message(&frame[1..], &mut payload),
                None => return Err(self.fail(ApiError::HandshakestateBadState)),
            };
            if let Err(e) = result {
                let reason = match e {
                    snow::Error::Decrypt => "Handshake MAC failure",
                    _ => "Handshake error",
                };
                warn!("{}: {}: {}", self.core.peer(), reason, e);
                self.send_explicit_handshake_reject(reason);
                return Err(self.fail(ApiError::HandshakestateReadFailed));
            }
        } else {
            let mut msg = [0u8; 1 + HANDSHAKE_MSG_MAX];
            let result = match self.handshake.as_mut() {
                Some(hs) => hs.write_message(&[], &mut msg[1..]),
                None => return Err(self.fail(ApiError::HandshakestateBadState)),
            };
            let n = match result {
                Ok(n) => n,
                Err(e) => {
                    warn!("{}: Handshake write failed: {}", self.core.peer(), e);
                    return Err(self.fail(ApiError::HandshakestateWriteFailed));
                }
            };
            msg[0] = 0x00;
            self.write_frame(&msg[..1 + n])?;
        }
        self.check_handshake_finished()
    }

    /// Advance the pre-DATA state machine by as much as the input allows.
    fn state_action(&mut self) -> Result<()> {
        match self.core.state {
            FrameState::Initialize => return Err(ApiError::BadState),
            FrameState::ClientHello => {
                let frame = self
                    .try_read_frame()
                    .map_err(|e| self.handle_handshake_frame_error(e))?;
                // Contents are reserved for future flags; only bound into the prologue.
                let len = frame.len() as u16;
                self.prologue.extend_from_slice(&len.to_be_bytes());
                self.prologue.extend_from_slice(&frame);
                self.core.state = FrameState::ServerHello;
            }
            _ => {}
        }

        if self.core.state == FrameState::ServerHello {
            let name = self.ctx.server_name().as_bytes();
            let mac = self.ctx.mac_address().as_bytes();
            let mut hello = Vec::with_capacity(3 + name.len() + mac.len());
            hello.push(PROTOCOL_NOISE);
            hello.extend_from_slice(name);
            hello.push(0);
            hello.extend_from_slice(mac);
            hello.push(0);
            self.write_frame(&hello)?;
            self.init_handshake()?;
            self.core.state = FrameState::Handshake;
        }

        match self.core.state {
            FrameState::Handshake => self.handshake_step(),
            FrameState::Closed | FrameState::Failed => Err(ApiError::BadState),
            _ => Ok(()),
        }
    }
}

impl FrameHelper for NoiseFrameHelper {
    fn init(&mut self) -> Result<()> {
        self.core.init_common()?;
        self.prologue.extend_from_slice(PROLOGUE_INIT);
        self.core.state = FrameState::ClientHello;
        Ok(())
    }

    fn poll(&mut self) -> Result<()> {
        while self.core.state != FrameState::Data && self.is_socket_ready() {
            match self.state_action() {
                Ok(()) => {}
                Err(ApiError::WouldBlock) => break,
                Err(e) => return Err(e),
            }
        }
        self.core.flush()
    }

    fn read_packet(&mut self) -> Result<ReadPacket> {
        self.state_action()?;
        if self.core.state != FrameState::Data {
            return Err(ApiError::WouldBlock);
        }

        let frame = self.try_read_frame()?;
        let mut plain = vec![0u8; frame.len()];
        let decrypted = match self.transport.as_mut() {
            Some(t) => t.read_message(&frame, &mut plain),
            None => return Err(self.fail(ApiError::HandshakestateBadState)),
        };
        let size = match decrypted {
            Ok(n) => n,
            Err(e) => {
                warn!("{}: Decrypt failed: {}", self.core.peer(), e);
                return Err(self.fail(ApiError::CipherstateDecryptFailed));
            }
        };
        if size < 4 {
            debug!("{}: Bad data packet: size {} too short", self.core.peer(), size);
            return Err(self.fail(ApiError::BadDataPacket));
        }
        let message_type = u16::from_be_bytes([plain[0], plain[1]]);
        let data_len = usize::from(u16::from_be_bytes([plain[2], plain[3]]));
        if data_len > size - 4 {
            debug!("{}: Bad data packet: data_len {} size {}", self.core.peer(), data_len, size);
            return Err(self.fail(ApiError::BadDataPacket));
        }
        plain.truncate(4 + data_len);
        plain.drain(..4);
        Ok(ReadPacket {
            message_type,
            payload: plain,
        })
    }

    fn write_protobuf_packet(&mut self, message_type: u8, buffer: &mut Vec<u8>) -> Result<()> {
        let payload_size = buffer
            .len()
            .checked_sub(HEADER_PADDING)
            .ok_or(ApiError::BadArg)?;
        buffer.resize(buffer.len() + FOOTER_SIZE, 0);
        let packet = PacketInfo {
            message_type,
            offset: 0,
            payload_size: u16::try_from(payload_size).map_err(|_| ApiError::BadArg)?,
        };
        self.write_protobuf_packets(buffer, &[packet])
    }

    fn write_protobuf_packets(&mut self, buffer: &mut Vec<u8>, packets: &[PacketInfo]) -> Result<()> {
        self.state_action()?;
        if self.core.state != FrameState::Data {
            return Err(ApiError::WouldBlock);
        }
        if packets.is_empty() {
            return Ok(());
        }

        let mut ranges = Vec::with_capacity(packets.len());
        let mut plain = Vec::new();
        for p in packets {
            let offset = usize::from(p.offset);
            let payload = usize::from(p.payload_size);
            let plain_len = 4 + payload;
            let end = offset + HEADER_PADDING + payload + FOOTER_SIZE;
            if end > buffer.len() {
                warn!("{}: Packet exceeds buffer ({} > {})", self.core.peer(), end, buffer.len());
                return Err(ApiError::BadArg);
            }

            buffer[offset] = 0x01;
            buffer[offset + 3..offset + 5].copy_from_slice(&u16::from(p.message_type).to_be_bytes());
            buffer[offset + 5..offset + 7].copy_from_slice(&p.payload_size.to_be_bytes());

            plain.clear();
            plain.extend_from_slice(&buffer[offset + 3..offset + 3 + plain_len]);
            let sealed = match self.transport.as_mut() {
                Some(t) => t.write_message(&plain, &mut buffer[offset + 3..end]),
                None => return Err(self.fail(ApiError::HandshakestateBadState)),
            };
            let ct_len = match sealed {
                Ok(n) => n,
                Err(e) => {
                    warn!("{}: Encrypt failed: {}", self.core.peer(), e);
                    return Err(self.fail(ApiError::CipherstateEncryptFailed));
                }
            };
            buffer[offset + 1..offset + 3].copy_from_slice(&(ct_len as u16).to_be_bytes());
            ranges.push(offset..offset + 3 + ct_len);
        }

        let iov: Vec<IoSlice<'_>> = ranges.into_iter().map(|r| IoSlice::new(&buffer[r])).collect();
        self.core.write_raw(&iov)
    }

    fn frame_header_padding(&self) -> usize {
        HEADER_PADDING
    }

    fn frame_footer_size(&self) -> usize {
        FOOTER_SIZE
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

#[cfg(test)]
mod tests {
    use super::super::test_socket::{pair, Shared};
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const PSK: [u8; PSK_LEN] = [0x42; PSK_LEN];

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut out = vec![0x01];
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    /// Split raw server output into frame bodies.
    fn frames(mut raw: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while raw.len() >= 3 {
            assert_eq!(raw[0], 0x01);
            let len = usize::from(u16::from_be_bytes([raw[1], raw[2]]));
            out.push(raw[3..3 + len].to_vec());
            raw = &raw[3 + len..];
        }
        out
    }

    fn helper() -> (Rc<RefCell<Shared>>, NoiseFrameHelper) {
        let ctx = Arc::new(NoiseContext::new("node", "AA:BB"));
        ctx.set_psk(PSK);
        let (shared, sock) = pair();
        let mut h = NoiseFrameHelper::new(sock, ctx);
        h.init().unwrap();
        (shared, h)
    }

    fn handshake(shared: &Rc<RefCell<Shared>>, h: &mut NoiseFrameHelper) -> snow::TransportState {
        let mut prologue = PROLOGUE_INIT.to_vec();
        prologue.extend_from_slice(&0u16.to_be_bytes());
        let mut client = snow::Builder::new(NOISE_PARAMS.parse().unwrap())
            .psk(0, &PSK)
            .unwrap()
            .prologue(&prologue)
            .unwrap()
            .build_initiator()
            .unwrap();

        let mut msg = [0u8; 128];
        let n = client.write_message(&[], &mut msg).unwrap();
        let mut body = vec![0x00];
        body.extend_from_slice(&msg[..n]);
        {
            let mut s = shared.borrow_mut();
            s.inbound.extend(frame(&[]));
            s.inbound.extend(frame(&body));
        }
        h.poll().unwrap();
        assert_eq!(h.state(), FrameState::Data);

        let out = frames(&shared.borrow_mut().outbound.split_off(0));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], b"\x01node\0AA:BB\0");
        assert_eq!(out[1][0], 0x00);
        let mut payload = [0u8; 128];
        client.read_message(&out[1][1..], &mut payload).unwrap();
        client.into_transport_mode().unwrap()
    }

    #[test]
    fn full_handshake_and_data_exchange() {
        let (shared, mut h) = helper();
        let mut client = handshake(&shared, &mut h);

        // client → server
        let mut plain = vec![0x00, 0x07, 0x00, 0x02, b'h', b'i'];
        let mut ct = [0u8; 64];
        let n = client.write_message(&plain, &mut ct).unwrap();
        shared.borrow_mut().inbound.extend(frame(&ct[..n]));
        let p = h.read_packet().unwrap();
        assert_eq!(p.message_type, 7);
        assert_eq!(p.payload, b"hi");

        // server → client
        let mut buf = vec![0u8; HEADER_PADDING];
        buf.extend_from_slice(b"ok");
        h.write_protobuf_packet(8, &mut buf).unwrap();
        let out = frames(&shared.borrow().outbound);
        assert_eq!(out.len(), 1);
        plain.resize(64, 0);
        let m = client.read_message(&out[0], &mut plain).unwrap();
        assert_eq!(&plain[..m], &[0x00, 0x08, 0x00, 0x02, b'o', b'k']);
    }

    #[test]
    fn bad_indicator_sends_reject() {
        let (shared, mut h) = helper();
        shared.borrow_mut().inbound.extend([0x00, 0x00, 0x00]);
        assert_eq!(h.poll(), Err(ApiError::BadIndicator));
        assert_eq!(h.state(), FrameState::Failed);
        let out = frames(&shared.borrow().outbound);
        assert_eq!(out[0], b"\x01Bad indicator byte");
    }

    #[test]
    fn oversized_handshake_frame_is_rejected() {
        let (shared, mut h) = helper();
        shared.borrow_mut().inbound.extend([0x01, 0x00, 0x81]);
        assert_eq!(h.poll(), Err(ApiError::BadHandshakePacketLen));
        let out = frames(&shared.borrow().outbound);
        assert_eq!(out[0], b"\x01Bad handshake packet len");
    }

    #[test]
    fn wrong_psk_reports_mac_failure() {
        let (shared, mut h) = helper();
        let mut prologue = PROLOGUE_INIT.to_vec();
        prologue.extend_from_slice(&0u16.to_be_bytes());
        let mut client = snow::Builder::new(NOISE_PARAMS.parse().unwrap())
            .psk(0, &[0x11; PSK_LEN])
            .unwrap()
            .prologue(&prologue)
            .unwrap()
            .build_initiator()
            .unwrap();
        let mut msg = [0u8; 128];
        let n = client.write_message(&[], &mut msg).unwrap();
        let mut body = vec![0x00];
        body.extend_from_slice(&msg[..n]);
        {
            let mut s = shared.borrow_mut();
            s.inbound.extend(frame(&[]));
            s.inbound.extend(frame(&body));
        }
        assert_eq!(h.poll(), Err(ApiError::HandshakestateReadFailed));
        let out = frames(&shared.borrow().outbound);
        assert_eq!(out.last().unwrap().as_slice(), b"\x01Handshake MAC failure");
    }

    #[test]
    fn nonzero_handshake_prefix_is_rejected() {
        let (shared, mut h) = helper();
        {
            let mut s = shared.borrow_mut();
            s.inbound.extend(frame(&[]));
            s.inbound.extend(frame(&[0x05, 0x00]));
        }
        assert_eq!(h.poll(), Err(ApiError::BadHandshakeErrorByte));
        assert_eq!(h.state(), FrameState::Failed);
        let out = frames(&shared.borrow().outbound);
        assert_eq!(out.last().unwrap().as_slice(), b"\x01Bad handshake error byte");
        assert_eq!(h.poll(), Err(ApiError::BadState));
    }

    #[test]
    fn empty_handshake_message_fails_helper() {
        let (shared, mut h) = helper();
        {
            let mut s = shared.borrow_mut();
            s.inbound.extend(frame(&[]));
            s.inbound.extend(frame(&[]));
        }
        assert_eq!(h.poll(), Err(ApiError::BadHandshakeErrorByte));
        assert_eq!(h.state(), FrameState::Failed);
        let out = frames(&shared.borrow().outbound);
        assert_eq!(out.last().unwrap().as_slice(), b"\x01Empty handshake message");
    }

    #[test]
    fn writes_wait_for_handshake() {
        let (_shared, mut h) = helper();
        let mut buf = vec![0u8; HEADER_PADDING];
        assert_eq!(h.write_protobuf_packet(7, &mut buf), Err(ApiError::WouldBlock));
    }

    #[test]
    fn psk_context_swaps() {
        let ctx = NoiseContext::new("n", "m");
        assert!(!ctx.has_psk());
        ctx.set_psk(PSK);
        assert_eq!(ctx.psk(), Some(PSK));
        ctx.clear_psk();
        assert!(!ctx.has_psk());
    }
}
