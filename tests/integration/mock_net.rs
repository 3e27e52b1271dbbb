//! Mock network adapters and scripted controllers for integration tests.
//!
//! `MockSocket` is the server end of an in-memory duplex; the test keeps
//! the other end as a [`Wire`] and plays the controller through
//! [`PlainClient`] or [`NoiseClient`].  [`Node`] wires an `ApiServer` into
//! an `Application` driven by a `ManualClock`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::rc::Rc;
use std::sync::Arc;

use native_api::adapters::nvs::NvsAdapter;
use native_api::app::events::ApiEvent;
use native_api::app::ports::{Listener, RandomSource, Socket};
use native_api::app::{Application, Context};
use native_api::clock::ManualClock;
use native_api::config::ApiConfig;
use native_api::entity::{Entity, EntityData, EntityInfo, StateClass};
use native_api::frame::noise::NOISE_PARAMS;
use native_api::proto::messages::HelloRequest;
use native_api::proto::{ProtoMessage, encode_varint, parse_varint};
use native_api::scheduler::ComponentId;
use native_api::server::ApiServer;

pub const SERVER_ID: ComponentId = ComponentId(1);

// ── Duplex wire ───────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Duplex {
    /// Controller → server bytes not yet read.
    pub to_server: VecDeque<u8>,
    /// Server → controller bytes not yet consumed by the test.
    pub to_client: Vec<u8>,
    /// Controller hung up; reads return 0.
    pub hung_up: bool,
    /// Number of `close` calls the server made.
    pub close_calls: u32,
}

pub type Wire = Rc<RefCell<Duplex>>;

pub struct MockSocket {
    wire: Wire,
    peer: String,
}

impl Socket for MockSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut w = self.wire.borrow_mut();
        if w.to_server.is_empty() {
            if w.hung_up {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(w.to_server.len());
        for (dst, src) in buf.iter_mut().zip(w.to_server.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn writev(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let mut w = self.wire.borrow_mut();
        let mut n = 0;
        for b in bufs {
            w.to_client.extend_from_slice(b);
            n += b.len();
        }
        Ok(n)
    }

    fn set_nonblocking(&mut self, _: bool) -> io::Result<()> {
        Ok(())
    }

    fn set_nodelay(&mut self, _: bool) -> io::Result<()> {
        Ok(())
    }

    fn peer_name(&self) -> String {
        self.peer.clone()
    }

    fn close(&mut self) -> io::Result<()> {
        self.wire.borrow_mut().close_calls += 1;
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hands out queued sockets, one per accept.
pub struct MockListener {
    pending: Rc<RefCell<VecDeque<Box<dyn Socket>>>>,
}

impl Listener for MockListener {
    fn accept(&mut self) -> io::Result<Option<Box<dyn Socket>>> {
        Ok(self.pending.borrow_mut().pop_front())
    }

    fn local_name(&self) -> String {
        "mock:6053".into()
    }
}

// ── Node under test ───────────────────────────────────────────

/// Fixed key for the temperature sensor.
pub const TEMPERATURE_KEY: u32 = 0xDEAD_BEEF;

#[derive(Debug, Clone, Copy, Default)]
pub struct Keys {
    pub relay: u32,
    pub temperature: u32,
    pub ring: u32,
    pub doorbell: u32,
}

/// Register a switch, a sensor, a button and an event entity.
pub fn populate(ctx: &mut Context) -> Keys {
    let mut temperature = EntityInfo::new("temperature", "Temperature");
    temperature.key = TEMPERATURE_KEY;
    Keys {
        relay: ctx
            .add_entity(Entity::new(
                EntityInfo::new("relay", "Relay"),
                EntityData::Switch {
                    state: false,
                    assumed_state: false,
                },
            ))
            .unwrap(),
        temperature: ctx
            .add_entity(Entity::new(
                temperature,
                EntityData::Sensor {
                    state: Some(20.0),
                    unit: "°C".into(),
                    accuracy_decimals: 1,
                    force_update: false,
                    state_class: StateClass::Measurement,
                },
            ))
            .unwrap(),
        ring: ctx
            .add_entity(Entity::new(EntityInfo::new("ring", "Ring"), EntityData::Button))
            .unwrap(),
        doorbell: ctx
            .add_entity(Entity::new(
                EntityInfo::new("doorbell", "Doorbell"),
                EntityData::Event {
                    event_types: vec!["ring".into()],
                },
            ))
            .unwrap(),
    }
}

struct FixedRandom;

impl RandomSource for FixedRandom {
    fn random_u32(&self) -> u32 {
        0x8000_0000
    }
}

pub struct Node {
    pub app: Application,
    pub clock: Arc<ManualClock>,
    pending: Rc<RefCell<VecDeque<Box<dyn Socket>>>>,
    next_port: u16,
}

impl Node {
    /// Build a node; `populate` registers entities before setup.
    pub fn new(config: ApiConfig, populate: impl FnOnce(&mut Context)) -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let mut ctx = Context::new(clock.clone(), Arc::new(FixedRandom));
        populate(&mut ctx);

        let pending = Rc::new(RefCell::new(VecDeque::new()));
        let listener = MockListener {
            pending: pending.clone(),
        };
        let server = ApiServer::new(SERVER_ID, config, Box::new(listener), Box::new(NvsAdapter::new()));

        let mut app = Application::new(ctx);
        app.register(Box::new(server));
        app.setup();
        Self {
            app,
            clock,
            pending,
            next_port: 50_000,
        }
    }

    /// Node with the [`populate`] entity set.
    pub fn standard(config: ApiConfig) -> (Self, Keys) {
        let mut keys = Keys::default();
        let node = Self::new(config, |ctx| keys = populate(ctx));
        (node, keys)
    }

    /// Queue a new client connection; accepted on the next loop.
    pub fn connect(&mut self) -> Wire {
        let wire = Wire::default();
        self.next_port += 1;
        self.pending.borrow_mut().push_back(Box::new(MockSocket {
            wire: wire.clone(),
            peer: format!("10.0.0.2:{}", self.next_port),
        }));
        wire
    }

    /// One loop iteration at the current clock.
    pub fn run(&mut self) {
        self.app.run_once();
    }

    /// Advance the clock, then run one loop iteration.
    pub fn step(&mut self, ms: u32) {
        self.clock.advance(ms);
        self.app.run_once();
    }

    /// Run loops for 300 ms of clock time so pending batches flush.
    pub fn settle(&mut self) {
        for _ in 0..6 {
            self.step(50);
        }
    }

    pub fn ctx(&mut self) -> &mut Context {
        self.app.context_mut()
    }

    pub fn events(&mut self) -> Vec<ApiEvent> {
        self.app.context_mut().take_events()
    }
}

// ── Plaintext controller ──────────────────────────────────────

pub struct PlainClient {
    pub wire: Wire,
}

impl PlainClient {
    pub fn new(wire: Wire) -> Self {
        Self { wire }
    }

    pub fn send<M: ProtoMessage>(&self, msg: &M) {
        let payload = msg.encode_to_vec();
        let mut frame = vec![0x00];
        encode_varint(&mut frame, payload.len() as u64);
        encode_varint(&mut frame, u64::from(M::MESSAGE_TYPE));
        frame.extend_from_slice(&payload);
        self.wire.borrow_mut().to_server.extend(frame);
    }

    pub fn send_raw(&self, bytes: &[u8]) {
        self.wire.borrow_mut().to_server.extend(bytes.iter().copied());
    }

    /// Drain and parse every frame the server wrote.
    pub fn recv(&self) -> Vec<(u8, Vec<u8>)> {
        let raw = core::mem::take(&mut self.wire.borrow_mut().to_client);
        let mut out = Vec::new();
        let mut rest = raw.as_slice();
        while !rest.is_empty() {
            assert_eq!(rest[0], 0x00, "plaintext indicator");
            let (len, n1) = parse_varint(&rest[1..]).unwrap();
            let (ty, n2) = parse_varint(&rest[1 + n1..]).unwrap();
            let start = 1 + n1 + n2;
            let end = start + len as usize;
            out.push((ty as u8, rest[start..end].to_vec()));
            rest = &rest[end..];
        }
        out
    }

    pub fn hello(&self) {
        self.send(&HelloRequest {
            client_info: "test".into(),
            api_version_major: 1,
            api_version_minor: 10,
        });
    }
}

// ── Noise controller ──────────────────────────────────────────

fn noise_frame(body: &[u8]) -> Vec<u8> {
    let mut out = vec![0x01];
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Split raw server output into Noise frame bodies.
pub fn noise_frames(mut raw: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while raw.len() >= 3 {
        assert_eq!(raw[0], 0x01, "noise indicator");
        let len = usize::from(u16::from_be_bytes([raw[1], raw[2]]));
        out.push(raw[3..3 + len].to_vec());
        raw = &raw[3 + len..];
    }
    out
}

pub struct NoiseClient {
    pub wire: Wire,
    handshake: Option<snow::HandshakeState>,
    transport: Option<snow::TransportState>,
}

impl NoiseClient {
    /// Queue the client hello and the first handshake message.
    pub fn begin(wire: Wire, psk: &[u8; 32]) -> Self {
        let mut prologue = b"NoiseAPIInit".to_vec();
        prologue.extend_from_slice(&0u16.to_be_bytes());
        let mut hs = snow::Builder::new(NOISE_PARAMS.parse().unwrap())
            .psk(0, psk)
            .unwrap()
            .prologue(&prologue)
            .unwrap()
            .build_initiator()
            .unwrap();

        let mut msg = [0u8; 128];
        let n = hs.write_message(&[], &mut msg).unwrap();
        let mut body = vec![0x00];
        body.extend_from_slice(&msg[..n]);
        {
            let mut w = wire.borrow_mut();
            w.to_server.extend(noise_frame(&[]));
            w.to_server.extend(noise_frame(&body));
        }
        Self {
            wire,
            handshake: Some(hs),
            transport: None,
        }
    }

    /// Consume the server hello and handshake reply.  Returns the server
    /// hello body, or the reject body on failure.
    pub fn finish(&mut self) -> Result<Vec<u8>, Vec<u8>> {
        let raw = core::mem::take(&mut self.wire.borrow_mut().to_client);
        let frames = noise_frames(&raw);
        let hello = frames.first().cloned().unwrap_or_default();
        let Some(reply) = frames.get(1) else {
            return Err(hello);
        };
        if reply[0] != 0x00 {
            return Err(reply.clone());
        }
        let mut hs = self.handshake.take().unwrap();
        let mut payload = [0u8; 128];
        hs.read_message(&reply[1..], &mut payload).unwrap();
        self.transport = Some(hs.into_transport_mode().unwrap());
        Ok(hello)
    }

    pub fn send<M: ProtoMessage>(&mut self, msg: &M) {
        let payload = msg.encode_to_vec();
        let mut plain = Vec::with_capacity(4 + payload.len());
        plain.extend_from_slice(&u16::from(M::MESSAGE_TYPE).to_be_bytes());
        plain.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        plain.extend_from_slice(&payload);
        let mut ct = vec![0u8; plain.len() + 16];
        let n = self
            .transport
            .as_mut()
            .unwrap()
            .write_message(&plain, &mut ct)
            .unwrap();
        self.wire.borrow_mut().to_server.extend(noise_frame(&ct[..n]));
    }

    pub fn recv(&mut self) -> Vec<(u8, Vec<u8>)> {
        let raw = core::mem::take(&mut self.wire.borrow_mut().to_client);
        let transport = self.transport.as_mut().unwrap();
        noise_frames(&raw)
            .into_iter()
            .map(|ct| {
                let mut plain = vec![0u8; ct.len()];
                let n = transport.read_message(&ct, &mut plain).unwrap();
                let ty = u16::from_be_bytes([plain[0], plain[1]]);
                let len = usize::from(u16::from_be_bytes([plain[2], plain[3]]));
                assert_eq!(n, 4 + len);
                (ty as u8, plain[4..n].to_vec())
            })
            .collect()
    }
}

/// Message type tags of a received batch.
pub fn types(frames: &[(u8, Vec<u8>)]) -> Vec<u8> {
    frames.iter().map(|(t, _)| *t).collect()
}
