//! Per-client connection state machine.
//!
//! ```text
//!  accept ──▶ start() ──▶ helper handshake ──▶ DATA
//!                                               │
//!          WaitingForHello ──Hello──▶ Connected ──Connect(ok)──▶ Authenticated
//!                 │                      (no password: straight through)
//!                 └──────────── DisconnectRequest ──▶ next_close ──▶ remove
//! ```
//!
//! `tick()` runs once per application loop:
//!
//! 1. honour `next_close`
//! 2. drive the frame helper (handshake, buffered output)
//! 3. read up to `max_messages_per_loop` packets and dispatch them
//! 4. flush the deferred batch once its delay expired
//! 5. advance the list-entities / initial-state walks
//! 6. keepalive ping, unresponsive-peer teardown, handshake timeout
//!
//! Every inbound message passes a gate before its handler runs.  A gate
//! failure is treated as a protocol violation and tears the connection down.

pub mod batch;
pub mod creators;
pub mod iterator;

use base64::Engine;
use hmac_sha256::HMAC;
use log::{debug, info, warn};

use crate::app::Context;
use crate::app::events::ApiEvent;
use crate::app::ports::EventSink;
use crate::config::ApiConfig;
use crate::entity::{EntityCommand, EntityKind, UpdateCommand};
use crate::error::ApiError;
use crate::frame::{FrameHelper, FrameState, ReadPacket};
use crate::frame::noise::PSK_LEN;
use crate::proto::messages::*;
use crate::proto::{ProtoDecodable, ProtoMessage};
use crate::server::PskManager;

use batch::{DeferredBatch, MessageCreator, MessageWriter};
use creators::encoders;
use iterator::{EntityIterator, IterFilter, IterStep};

/// Items queued by one iterator step before the batch is force-flushed.
pub const MAX_INITIAL_PER_BATCH: usize = 24;

/// Fixed key for the password digest comparison.
const PASSWORD_DIGEST_KEY: &[u8] = b"native-api/password";

/// Everything a connection borrows from its server for one call.
pub struct ConnectionEnv<'a> {
    pub config: &'a ApiConfig,
    pub ctx: &'a mut Context,
    /// Shared encode buffer.
    pub arena: &'a mut Vec<u8>,
    pub keys: &'a mut PskManager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    WaitingForHello,
    Connected,
    Authenticated,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionFlags {
    pub state_subscription: bool,
    /// Wire log level; 0 = not subscribed.
    pub log_subscription: u8,
    pub sent_ping: bool,
    pub remove: bool,
    pub next_close: bool,
    pub should_try_send_immediately: bool,
}

/// Client identity for log lines.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    /// From `HelloRequest.client_info`; empty until hello.
    pub name: String,
    pub peer: String,
}

impl ClientInfo {
    /// `name (peer)`, or just the peer before hello.
    pub fn combined(&self) -> String {
        if self.name.is_empty() {
            self.peer.clone()
        } else {
            format!("{} ({})", self.name, self.peer)
        }
    }
}

/// Digest both sides and compare in constant time.  An unset or empty
/// configured password accepts anything.
pub fn check_password(config: &ApiConfig, supplied: &str) -> bool {
    let Some(expected) = config.password.as_deref().filter(|p| !p.is_empty()) else {
        return true;
    };
    let tag = HMAC::mac(expected.as_bytes(), PASSWORD_DIGEST_KEY);
    HMAC::verify(supplied.as_bytes(), PASSWORD_DIGEST_KEY, &tag)
}

// ───────────────────────────────────────────────────────────────
// Connection
// ───────────────────────────────────────────────────────────────

pub struct ApiConnection {
    helper: Box<dyn FrameHelper>,
    client: ClientInfo,
    api_version: (u32, u32),
    state: ConnectionState,
    flags: ConnectionFlags,
    last_traffic: u32,
    started_at: u32,
    batch: DeferredBatch,
    list_entities: EntityIterator,
    initial_state: EntityIterator,
}

impl ApiConnection {
    pub fn new(helper: Box<dyn FrameHelper>) -> Self {
        let peer = helper.peer_name().to_owned();
        Self {
            helper,
            client: ClientInfo {
                name: String::new(),
                peer,
            },
            api_version: (0, 0),
            state: ConnectionState::WaitingForHello,
            flags: ConnectionFlags::default(),
            last_traffic: 0,
            started_at: 0,
            batch: DeferredBatch::new(),
            list_entities: EntityIterator::new(IterFilter::Info),
            initial_state: EntityIterator::new(IterFilter::State),
        }
    }

    /// Configure the socket and begin the handshake.
    pub fn start(&mut self, now: u32) {
        self.last_traffic = now;
        self.started_at = now;
        if let Err(e) = self.helper.init() {
            self.on_fatal_error();
            self.log_warning("Helper init failed", e);
        }
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn client(&self) -> &ClientInfo {
        &self.client
    }

    pub fn api_version(&self) -> (u32, u32) {
        self.api_version
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn frame_state(&self) -> FrameState {
        self.helper.state()
    }

    pub fn flags(&self) -> &ConnectionFlags {
        &self.flags
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    pub fn is_connection_setup(&self) -> bool {
        self.state >= ConnectionState::Connected
    }

    pub fn is_removed(&self) -> bool {
        self.flags.remove
    }

    /// Authenticated and subscribed to state changes.
    pub fn wants_states(&self) -> bool {
        self.is_authenticated() && self.flags.state_subscription
    }

    pub fn pending_batch(&self) -> usize {
        self.batch.len()
    }

    // ── Loop ─────────────────────────────────────────────────

    pub fn tick(&mut self, env: &mut ConnectionEnv<'_>) {
        if self.flags.next_close {
            self.close_socket();
            self.flags.remove = true;
            return;
        }

        if let Err(e) = self.helper.poll() {
            if !e.is_would_block() {
                self.on_fatal_error();
                self.log_warning("Socket operation failed", e);
                return;
            }
        }

        let now = env.ctx.now();
        if self.helper.is_socket_ready() {
            for _ in 0..env.config.max_messages_per_loop {
                match self.helper.read_packet() {
                    Err(ApiError::WouldBlock) => break,
                    Err(e) => {
                        self.on_fatal_error();
                        self.log_warning("Reading failed", e);
                        return;
                    }
                    Ok(packet) => {
                        self.last_traffic = now;
                        self.read_message(env, &packet);
                        if self.flags.remove {
                            return;
                        }
                    }
                }
            }
        }

        if self.batch.is_due(now, u32::from(env.config.batch_delay_ms)) {
            self.process_batch(env);
        }

        if !self.list_entities.completed() {
            self.process_iterator_batch(env, IterFilter::Info);
        } else if !self.initial_state.completed() {
            self.process_iterator_batch(env, IterFilter::State);
            if self.initial_state.completed() {
                if !self.batch.is_empty() {
                    self.process_batch(env);
                }
                self.flags.should_try_send_immediately = true;
            }
        }

        if self.helper.state() == FrameState::Data {
            self.check_keepalive(env, now);
        } else if now.wrapping_sub(self.started_at) > env.config.handshake_timeout_ms
            && !self.flags.remove
        {
            self.on_fatal_error();
            warn!("{}: Handshake timed out", self.client.combined());
        }
    }

    fn check_keepalive(&mut self, env: &mut ConnectionEnv<'_>, now: u32) {
        let idle = now.wrapping_sub(self.last_traffic);
        if self.flags.sent_ping {
            if idle > env.config.keepalive_disconnect_ms() {
                self.on_fatal_error();
                warn!("{} is unresponsive; disconnecting", self.client.combined());
            }
        } else if idle > env.config.keepalive_ms && !self.flags.remove {
            self.flags.sent_ping = self.send_message(env, &PingRequest::default());
            if !self.flags.sent_ping {
                warn!("{}: Buffer full, ping queued", self.client.combined());
                self.batch.add_item_front(
                    None,
                    MessageCreator::Func(creators::ping_request),
                    PingRequest::MESSAGE_TYPE,
                    PingRequest::ESTIMATED_SIZE,
                    now,
                );
                self.flags.sent_ping = true;
            }
        }
    }

    fn process_iterator_batch(&mut self, env: &mut ConnectionEnv<'_>, filter: IterFilter) {
        let now = env.ctx.now();
        let mut queued = 0;
        while queued < MAX_INITIAL_PER_BATCH {
            let walk = match filter {
                IterFilter::Info => &mut self.list_entities,
                IterFilter::State => &mut self.initial_state,
            };
            match walk.advance(&env.ctx.entities) {
                IterStep::Entity { key, kind } => {
                    self.enqueue_walk_item(filter, key, kind, now);
                    queued += 1;
                }
                IterStep::Skip => {}
                IterStep::End => {
                    if filter == IterFilter::Info {
                        self.batch.add_item(
                            None,
                            MessageCreator::Func(creators::list_entities_done),
                            ListEntitiesDoneResponse::MESSAGE_TYPE,
                            ListEntitiesDoneResponse::ESTIMATED_SIZE,
                            now,
                        );
                    }
                    break;
                }
            }
        }
        if self.batch.len() >= MAX_INITIAL_PER_BATCH {
            self.process_batch(env);
        }
    }

    fn enqueue_walk_item(&mut self, filter: IterFilter, key: u32, kind: EntityKind, now: u32) {
        let enc = encoders(kind);
        match filter {
            IterFilter::Info => self.batch.add_item(
                Some(key),
                MessageCreator::Func(enc.info),
                enc.info_type,
                enc.info_size,
                now,
            ),
            IterFilter::State => {
                if let Some(state) = &enc.state {
                    self.batch.add_item(
                        Some(key),
                        MessageCreator::Func(state.create),
                        state.message_type,
                        state.estimated_size,
                        now,
                    );
                }
            }
        }
    }

    // ── Batch flush ──────────────────────────────────────────

    fn process_batch(&mut self, env: &mut ConnectionEnv<'_>) {
        if self.batch.is_empty() {
            self.batch.clear();
            return;
        }
        if !self.try_to_clear_buffer(true) {
            return;
        }

        let padding = self.helper.frame_header_padding();
        let footer = self.helper.frame_footer_size();

        if self.batch.len() == 1 {
            let message_type = self.batch.items()[0].message_type;
            let size = self.batch.encode_single(&env.ctx.entities, env.arena, padding, footer);
            if size == 0 {
                warn!("Message too large to send: type={}", message_type);
                self.batch.clear();
            } else if self.send_buffer(env.arena, message_type) {
                self.batch.clear();
            }
            return;
        }

        let packets = self.batch.encode_batch(
            &env.ctx.entities,
            env.arena,
            padding,
            footer,
            usize::from(env.config.max_packets_per_batch),
        );
        if packets.is_empty() {
            warn!("Message too large to send: type={}", self.batch.items()[0].message_type);
            self.batch.clear();
            return;
        }

        match self.helper.write_protobuf_packets(env.arena, &packets) {
            Ok(()) | Err(ApiError::WouldBlock) => {}
            Err(e) => {
                self.on_fatal_error();
                self.log_warning("Batch write failed", e);
            }
        }
        self.batch.remove_front(packets.len(), env.ctx.now());
    }

    // ── Outbound ─────────────────────────────────────────────

    /// Flush queued bytes if needed.  `true` when a new message can go out
    /// without queueing.
    fn try_to_clear_buffer(&mut self, log_out_of_space: bool) -> bool {
        if self.flags.remove {
            return false;
        }
        if self.helper.can_write_without_blocking() {
            return true;
        }
        if let Err(e) = self.helper.poll() {
            if !e.is_would_block() {
                self.on_fatal_error();
                self.log_warning("Socket operation failed", e);
                return false;
            }
        }
        if self.helper.can_write_without_blocking() {
            return true;
        }
        if log_out_of_space {
            warn!("{}: Cannot send message because of TCP buffer space", self.client.combined());
        }
        false
    }

    fn send_buffer(&mut self, buffer: &mut Vec<u8>, message_type: u8) -> bool {
        match self.helper.write_protobuf_packet(message_type, buffer) {
            Ok(()) => true,
            Err(ApiError::WouldBlock) => false,
            Err(e) => {
                self.on_fatal_error();
                self.log_warning("Packet write failed", e);
                false
            }
        }
    }

    /// Encode and send one message right away.
    pub fn send_message<M: ProtoMessage>(&mut self, env: &mut ConnectionEnv<'_>, msg: &M) -> bool {
        if !self.try_to_clear_buffer(true) {
            return false;
        }
        let padding = self.helper.frame_header_padding();
        let footer = self.helper.frame_footer_size();
        if MessageWriter::single(env.arena, padding, footer).encode(msg) == 0 {
            warn!("Message too large to send: type={}", M::MESSAGE_TYPE);
            return false;
        }
        self.send_buffer(env.arena, M::MESSAGE_TYPE)
    }

    /// Push the current state of `key`.  Goes out immediately when the
    /// kind demands it, or when initial states are done with no batch
    /// delay; otherwise it joins the deferred batch.
    pub fn send_state(&mut self, env: &mut ConnectionEnv<'_>, key: u32) {
        let Some(entity) = env.ctx.entities.get(key) else {
            return;
        };
        if entity.info.internal {
            return;
        }
        let Some(enc) = encoders(entity.kind()).state.as_ref() else {
            return;
        };

        let immediate = enc.immediate
            || (self.flags.should_try_send_immediately && env.config.batch_delay_ms == 0);
        if immediate && self.helper.can_write_without_blocking() {
            let padding = self.helper.frame_header_padding();
            let footer = self.helper.frame_footer_size();
            let size = (enc.create)(Some(entity), &mut MessageWriter::single(env.arena, padding, footer));
            if size > 0 && self.send_buffer(env.arena, enc.message_type) {
                return;
            }
        }

        self.batch.add_item(
            Some(key),
            MessageCreator::Func(enc.create),
            enc.message_type,
            enc.estimated_size,
            env.ctx.now(),
        );
    }

    /// Queue an `EventResponse`.  Events always go through the batch.
    pub fn send_event(&mut self, env: &mut ConnectionEnv<'_>, key: u32, event_type: &str) {
        self.batch.add_item(
            Some(key),
            MessageCreator::Event(event_type.to_owned()),
            EventResponse::MESSAGE_TYPE,
            EventResponse::ESTIMATED_SIZE,
            env.ctx.now(),
        );
    }

    /// Forward a log line if the client subscribed at `level` or finer.
    pub fn send_log(&mut self, env: &mut ConnectionEnv<'_>, level: u8, line: &str) -> bool {
        if self.flags.log_subscription < level {
            return false;
        }
        let msg = SubscribeLogsResponse {
            level: u32::from(level),
            message: line.as_bytes().to_vec(),
        };
        self.send_message(env, &msg)
    }

    /// Ask the client to disconnect; queued at the front if the socket is full.
    pub fn send_disconnect_request(&mut self, env: &mut ConnectionEnv<'_>) {
        if !self.send_message(env, &DisconnectRequest::default()) {
            self.batch.add_item_front(
                None,
                MessageCreator::Func(creators::disconnect_request),
                DisconnectRequest::MESSAGE_TYPE,
                DisconnectRequest::ESTIMATED_SIZE,
                env.ctx.now(),
            );
        }
    }

    pub fn on_fatal_error(&mut self) {
        self.close_socket();
        self.flags.remove = true;
    }

    fn close_socket(&mut self) {
        if let Err(e) = self.helper.close() {
            debug!("{}: Close failed: {}", self.client.combined(), e);
        }
    }

    fn log_warning(&self, what: &str, err: ApiError) {
        warn!("{}: {} {}", self.client.combined(), what, err);
    }

    // ── Gates ────────────────────────────────────────────────

    fn allow_any(&mut self, _name: &str) -> bool {
        true
    }

    fn check_connection_setup(&mut self, name: &str) -> bool {
        if self.is_connection_setup() {
            return true;
        }
        self.on_no_setup_connection(name);
        false
    }

    fn check_authenticated(&mut self, name: &str) -> bool {
        if self.is_authenticated() {
            return true;
        }
        if self.is_connection_setup() {
            warn!("{}: {} access without authentication", self.client.combined(), name);
            self.on_fatal_error();
        } else {
            self.on_no_setup_connection(name);
        }
        false
    }

    fn on_no_setup_connection(&mut self, name: &str) {
        warn!("{}: {} access without full connection", self.client.combined(), name);
        self.on_fatal_error();
    }
}

// ───────────────────────────────────────────────────────────────
// Dispatch
// ───────────────────────────────────────────────────────────────

macro_rules! dispatch {
    ($conn:ident, $env:ident, $packet:ident; $($msg:ty => $gate:ident, $handler:ident;)*) => {{
        let message_type = $packet.message_type;
        $(
            if message_type == u16::from(<$msg>::MESSAGE_TYPE) {
                if !$conn.$gate(<$msg>::NAME) {
                    return;
                }
                match <$msg>::decode(&$packet.payload) {
                    Ok(msg) => $conn.$handler($env, msg),
                    Err(e) => {
                        warn!("{}: Bad {}: {}", $conn.client.combined(), <$msg>::NAME, e);
                        $conn.on_fatal_error();
                    }
                }
                return;
            }
        )*
        debug!("{}: Ignoring message type {}", $conn.client.combined(), message_type);
    }};
}

impl ApiConnection {
    fn read_message(&mut self, env: &mut ConnectionEnv<'_>, packet: &ReadPacket) {
        dispatch!(self, env, packet;
            HelloRequest => allow_any, on_hello;
            ConnectRequest => allow_any, on_connect;
            DisconnectRequest => allow_any, on_disconnect_request;
            DisconnectResponse => allow_any, on_disconnect_response;
            PingRequest => allow_any, on_ping_request;
            PingResponse => allow_any, on_ping_response;
            GetTimeResponse => allow_any, on_get_time_response;
            DeviceInfoRequest => check_connection_setup, on_device_info;
            GetTimeRequest => check_connection_setup, on_get_time_request;
            ListEntitiesRequest => check_authenticated, on_list_entities;
            SubscribeStatesRequest => check_authenticated, on_subscribe_states;
            SubscribeLogsRequest => check_authenticated, on_subscribe_logs;
            SwitchCommandRequest => check_authenticated, on_switch_command;
            ButtonCommandRequest => check_authenticated, on_button_command;
            UpdateCommandRequest => check_authenticated, on_update_command;
            NoiseEncryptionSetKeyRequest => check_authenticated, on_noise_set_key;
        );
    }

    // ── Handshake / session ──────────────────────────────────

    fn on_hello(&mut self, env: &mut ConnectionEnv<'_>, msg: HelloRequest) {
        self.client.name = msg.client_info;
        self.api_version = (msg.api_version_major, msg.api_version_minor);
        debug!(
            "Hello from client: '{}' | {} | API Version {}.{}",
            self.client.name, self.client.peer, msg.api_version_major, msg.api_version_minor
        );

        let resp = HelloResponse {
            api_version_major: API_VERSION_MAJOR,
            api_version_minor: API_VERSION_MINOR,
            server_info: env.config.server_info.clone(),
            name: env.config.node_name.clone(),
        };
        self.send_message(env, &resp);

        if env.config.uses_password() {
            self.state = ConnectionState::Connected;
        } else {
            self.complete_authentication(env);
        }
    }

    fn on_connect(&mut self, env: &mut ConnectionEnv<'_>, msg: ConnectRequest) {
        let correct = check_password(env.config, &msg.password);
        self.send_message(env, &ConnectResponse {
            invalid_password: !correct,
        });
        if correct {
            self.complete_authentication(env);
        } else {
            warn!("{}: Invalid password", self.client.combined());
        }
    }

    fn complete_authentication(&mut self, env: &mut ConnectionEnv<'_>) {
        if self.state == ConnectionState::Authenticated {
            return;
        }
        self.state = ConnectionState::Authenticated;
        info!("{} connected", self.client.combined());
        env.ctx.emit(ApiEvent::ClientConnected {
            name: self.client.name.clone(),
            peer: self.client.peer.clone(),
        });
        if env.ctx.clock().epoch_seconds().is_none() {
            self.send_message(env, &GetTimeRequest::default());
        }
    }

    fn on_disconnect_request(&mut self, env: &mut ConnectionEnv<'_>, _: DisconnectRequest) {
        info!("{} requested disconnected", self.client.combined());
        self.send_message(env, &DisconnectResponse::default());
        self.flags.next_close = true;
    }

    fn on_disconnect_response(&mut self, _: &mut ConnectionEnv<'_>, _: DisconnectResponse) {
        self.close_socket();
        self.flags.remove = true;
    }

    fn on_ping_request(&mut self, env: &mut ConnectionEnv<'_>, _: PingRequest) {
        self.send_message(env, &PingResponse::default());
    }

    fn on_ping_response(&mut self, _: &mut ConnectionEnv<'_>, _: PingResponse) {
        self.flags.sent_ping = false;
    }

    fn on_device_info(&mut self, env: &mut ConnectionEnv<'_>, _: DeviceInfoRequest) {
        let cfg = env.config;
        let resp = DeviceInfoResponse {
            uses_password: cfg.uses_password(),
            name: cfg.node_name.clone(),
            mac_address: cfg.mac_address.clone(),
            esphome_version: cfg.esphome_version.clone(),
            compilation_time: cfg.compilation_time.clone(),
            model: cfg.model.clone(),
            manufacturer: cfg.manufacturer.clone(),
            friendly_name: cfg.friendly_name.clone(),
            api_encryption_supported: env.keys.noise().has_psk(),
        };
        self.send_message(env, &resp);
    }

    // ── Time ─────────────────────────────────────────────────

    fn on_get_time_request(&mut self, env: &mut ConnectionEnv<'_>, _: GetTimeRequest) {
        match env.ctx.clock().epoch_seconds() {
            Some(epoch_seconds) => {
                self.send_message(env, &GetTimeResponse { epoch_seconds });
            }
            None => debug!("{}: Time requested but not known", self.client.combined()),
        }
    }

    fn on_get_time_response(&mut self, env: &mut ConnectionEnv<'_>, msg: GetTimeResponse) {
        env.ctx.clock().set_epoch_seconds(msg.epoch_seconds);
        env.ctx.emit(ApiEvent::TimeSynced(msg.epoch_seconds));
    }

    // ── Subscriptions ────────────────────────────────────────

    fn on_list_entities(&mut self, _: &mut ConnectionEnv<'_>, _: ListEntitiesRequest) {
        self.list_entities.begin();
    }

    fn on_subscribe_states(&mut self, _: &mut ConnectionEnv<'_>, _: SubscribeStatesRequest) {
        self.flags.state_subscription = true;
        self.initial_state.begin();
    }

    fn on_subscribe_logs(&mut self, env: &mut ConnectionEnv<'_>, msg: SubscribeLogsRequest) {
        self.flags.log_subscription = u8::try_from(msg.level).unwrap_or(u8::MAX);
        if msg.dump_config {
            env.ctx.emit(ApiEvent::DumpConfig);
        }
    }

    // ── Entity commands ──────────────────────────────────────

    fn entity_matches(&self, env: &ConnectionEnv<'_>, key: u32, device_id: u32, kind: EntityKind) -> bool {
        let found = env
            .ctx
            .entities
            .get(key)
            .is_some_and(|e| e.kind() == kind && e.device_id() == device_id);
        if !found {
            debug!("{}: No {:?} with key {:#010x}", self.client.combined(), kind, key);
        }
        found
    }

    fn on_switch_command(&mut self, env: &mut ConnectionEnv<'_>, msg: SwitchCommandRequest) {
        if self.entity_matches(env, msg.key, msg.device_id, EntityKind::Switch) {
            env.ctx.handle_command(EntityCommand::Switch {
                key: msg.key,
                state: msg.state,
            });
        }
    }

    fn on_button_command(&mut self, env: &mut ConnectionEnv<'_>, msg: ButtonCommandRequest) {
        if self.entity_matches(env, msg.key, msg.device_id, EntityKind::Button) {
            env.ctx.handle_command(EntityCommand::Button { key: msg.key });
        }
    }

    fn on_update_command(&mut self, env: &mut ConnectionEnv<'_>, msg: UpdateCommandRequest) {
        if self.entity_matches(env, msg.key, msg.device_id, EntityKind::Update) {
            env.ctx.handle_command(EntityCommand::Update {
                key: msg.key,
                command: UpdateCommand::from_wire(msg.command),
            });
        }
    }

    // ── Encryption key ───────────────────────────────────────

    fn on_noise_set_key(&mut self, env: &mut ConnectionEnv<'_>, msg: NoiseEncryptionSetKeyRequest) {
        let decoded = base64::engine::general_purpose::STANDARD.decode(msg.key.as_bytes());
        let success = match decoded.ok().and_then(|b| <[u8; PSK_LEN]>::try_from(b.as_slice()).ok()) {
            None => {
                warn!("Invalid encryption key length");
                false
            }
            Some(psk) => {
                let saved = env.keys.save_noise_psk(psk, true, &env.ctx.scheduler);
                if !saved {
                    warn!("Failed to save encryption key");
                }
                saved
            }
        };
        self.send_message(env, &NoiseEncryptionSetKeyResponse { success });
    }
}
