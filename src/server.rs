//! API server — listener, connection set, entity fan-out, PSK rotation.
//!
//! ```text
//!  ApiServer::tick(ctx)
//!    ├─ accept()  ──▶ rate limit ──▶ Noise helper (PSK set) | plaintext
//!    ├─ PSK activated?  ──▶ DisconnectRequest to every client
//!    ├─ ctx.take_updates() ──▶ send_state / send_event (subscribed only)
//!    ├─ LOG_CHANNEL ──▶ send_log (log-subscribed only)
//!    ├─ connection.tick() for each live connection
//!    └─ sweep connections flagged `remove`
//! ```
//!
//! All connections share one encode arena owned by the server; only one
//! connection encodes at a time.

use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use burster::Limiter;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::adapters::time::platform_now;
use crate::app::events::{ApiEvent, LOG_CHANNEL, LogLine};
use crate::app::ports::{EventSink, Listener, StoragePort};
use crate::app::{Component, Context};
use crate::config::ApiConfig;
use crate::connection::{ApiConnection, ConnectionEnv};
use crate::entity::EntityUpdate;
use crate::frame::noise::PSK_LEN;
use crate::frame::{FrameHelper, NoiseContext, NoiseFrameHelper, PlaintextFrameHelper};
use crate::scheduler::{ComponentId, Scheduler};

const PSK_NAMESPACE: &str = "api";
const PSK_KEY: &str = "noise_psk";

/// Delay between persisting a new PSK and switching to it, so the
/// `NoiseEncryptionSetKeyResponse` leaves under the old key.
const PSK_ACTIVATE_DELAY_MS: u32 = 100;

/// Log lines forwarded per loop.  Lines logged while forwarding wait for
/// the next loop.
const LOG_FORWARD_PER_LOOP: usize = 16;

// ───────────────────────────────────────────────────────────────
// PSK persistence
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct SavedNoisePsk {
    psk: [u8; PSK_LEN],
}

/// Owns the Noise PSK record and its activation.
pub struct PskManager {
    storage: Box<dyn StoragePort>,
    noise: Arc<NoiseContext>,
    reset_pending: Arc<AtomicBool>,
    owner: ComponentId,
}

impl PskManager {
    pub fn new(storage: Box<dyn StoragePort>, noise: Arc<NoiseContext>, owner: ComponentId) -> Self {
        Self {
            storage,
            noise,
            reset_pending: Arc::new(AtomicBool::new(false)),
            owner,
        }
    }

    pub fn noise(&self) -> &Arc<NoiseContext> {
        &self.noise
    }

    /// Stored PSK, if a valid record exists.
    pub fn load(&self) -> Option<[u8; PSK_LEN]> {
        let mut buf = [0u8; 64];
        let n = match self.storage.read(PSK_NAMESPACE, PSK_KEY, &mut buf) {
            Ok(n) => n,
            Err(e) => {
                debug!("No saved Noise PSK: {}", e);
                return None;
            }
        };
        match postcard::from_bytes::<SavedNoisePsk>(&buf[..n]) {
            Ok(saved) => Some(saved.psk),
            Err(e) => {
                warn!("Saved Noise PSK unreadable: {}", e);
                None
            }
        }
    }

    /// Persist `psk`; with `make_active`, switch to it after a short delay
    /// and flag every client for disconnect.
    pub fn save_noise_psk(&mut self, psk: [u8; PSK_LEN], make_active: bool, scheduler: &Scheduler) -> bool {
        if self.noise.psk() == Some(psk) {
            warn!("New PSK matches old");
            return true;
        }

        let record = match postcard::to_allocvec(&SavedNoisePsk { psk }) {
            Ok(r) => r,
            Err(e) => {
                warn!("Failed to encode Noise PSK: {}", e);
                return false;
            }
        };
        if let Err(e) = self.storage.write(PSK_NAMESPACE, PSK_KEY, &record) {
            warn!("Failed to save Noise PSK: {}", e);
            return false;
        }
        debug!("Noise PSK saved");

        if make_active {
            let noise = self.noise.clone();
            let reset = self.reset_pending.clone();
            scheduler.set_timeout(self.owner, "api_psk_activate", PSK_ACTIVATE_DELAY_MS, move |_| {
                warn!("Disconnecting all clients to reset PSK");
                noise.set_psk(psk);
                reset.store(true, Ordering::Release);
            });
        }
        true
    }

    /// `true` once after a scheduled activation fired.
    pub fn take_reset_pending(&self) -> bool {
        self.reset_pending.swap(false, Ordering::AcqRel)
    }
}

// ───────────────────────────────────────────────────────────────
// Server
// ───────────────────────────────────────────────────────────────

pub struct ApiServer {
    id: ComponentId,
    config: ApiConfig,
    listener: Box<dyn Listener>,
    connections: Vec<ApiConnection>,
    arena: Vec<u8>,
    keys: PskManager,
    accept_limiter: burster::TokenBucket<fn() -> Duration>,
}

impl ApiServer {
    pub fn new(
        id: ComponentId,
        config: ApiConfig,
        listener: Box<dyn Listener>,
        storage: Box<dyn StoragePort>,
    ) -> Self {
        let noise = Arc::new(NoiseContext::new(
            config.node_name.clone(),
            config.mac_address.clone(),
        ));
        let rate = config.max_accepts_per_sec;
        Self {
            id,
            listener,
            connections: Vec::new(),
            arena: Vec::new(),
            keys: PskManager::new(storage, noise, id),
            accept_limiter: burster::TokenBucket::new_with_time_provider(
                rate.into(),
                rate.into(),
                platform_now as fn() -> Duration,
            ),
            config,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn connections(&self) -> &[ApiConnection] {
        &self.connections
    }

    pub fn noise(&self) -> &Arc<NoiseContext> {
        self.keys.noise()
    }

    fn accept_new(&mut self, ctx: &mut Context) {
        loop {
            let mut socket = match self.listener.accept() {
                Ok(Some(s)) => s,
                Ok(None) => break,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    break;
                }
            };
            let peer = socket.peer_name();
            if self.connections.len() >= usize::from(self.config.max_connections) {
                warn!("Max connections ({}), rejecting {}", self.config.max_connections, peer);
                if let Err(e) = socket.close() {
                    debug!("{}: Close failed: {}", peer, e);
                }
                continue;
            }
            if self.accept_limiter.try_consume(1).is_err() {
                warn!("Accept rate exceeded, rejecting {}", peer);
                if let Err(e) = socket.close() {
                    debug!("{}: Close failed: {}", peer, e);
                }
                continue;
            }

            let helper: Box<dyn FrameHelper> = if self.keys.noise().has_psk() {
                Box::new(NoiseFrameHelper::new(socket, self.keys.noise().clone()))
            } else {
                Box::new(PlaintextFrameHelper::new(socket))
            };
            debug!("Accept {}", peer);
            let mut conn = ApiConnection::new(helper);
            conn.start(ctx.now());
            self.connections.push(conn);
        }
    }

    fn fan_out(&mut self, ctx: &mut Context, updates: &[EntityUpdate]) {
        if updates.is_empty() {
            return;
        }
        let mut env = ConnectionEnv {
            config: &self.config,
            ctx,
            arena: &mut self.arena,
            keys: &mut self.keys,
        };
        for conn in self.connections.iter_mut().filter(|c| c.wants_states()) {
            for update in updates {
                match update {
                    EntityUpdate::State(key) => conn.send_state(&mut env, *key),
                    EntityUpdate::Event { key, event_type } => conn.send_event(&mut env, *key, event_type),
                }
            }
        }
    }

    fn forward_logs(&mut self, ctx: &mut Context) {
        let lines: Vec<LogLine> = core::iter::from_fn(|| LOG_CHANNEL.try_receive().ok())
            .take(LOG_FORWARD_PER_LOOP)
            .collect();
        if lines.is_empty() {
            return;
        }
        let mut env = ConnectionEnv {
            config: &self.config,
            ctx,
            arena: &mut self.arena,
            keys: &mut self.keys,
        };
        for conn in self
            .connections
            .iter_mut()
            .filter(|c| c.is_authenticated() && c.flags().log_subscription > 0)
        {
            for line in &lines {
                conn.send_log(&mut env, line.level, &line.line);
            }
        }
    }

    fn sweep(&mut self, ctx: &mut Context) {
        self.connections.retain(|c| {
            if !c.is_removed() {
                return true;
            }
            debug!("Removing connection to {}", c.client().combined());
            if c.is_authenticated() {
                info!("{} disconnected", c.client().combined());
                ctx.emit(ApiEvent::ClientDisconnected {
                    name: c.client().name.clone(),
                    peer: c.client().peer.clone(),
                });
            }
            false
        });
    }
}

impl Component for ApiServer {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn name(&self) -> &'static str {
        "api"
    }

    fn setup(&mut self, _ctx: &mut Context) {
        if let Some(encoded) = self.config.encryption_key.as_deref() {
            let decoded = base64::engine::general_purpose::STANDARD.decode(encoded.as_bytes());
            match decoded.ok().and_then(|b| <[u8; PSK_LEN]>::try_from(b.as_slice()).ok()) {
                Some(psk) => self.keys.noise().set_psk(psk),
                None => warn!("Configured encryption key is not 32 bytes of base64; ignoring"),
            }
        }
        if let Some(psk) = self.keys.load() {
            info!("Loaded saved Noise PSK");
            self.keys.noise().set_psk(psk);
        }
        info!("API server listening on {}", self.listener.local_name());
    }

    fn tick(&mut self, ctx: &mut Context) {
        self.accept_new(ctx);

        if self.keys.take_reset_pending() {
            ctx.emit(ApiEvent::PskActivated);
            let mut env = ConnectionEnv {
                config: &self.config,
                ctx: &mut *ctx,
                arena: &mut self.arena,
                keys: &mut self.keys,
            };
            for conn in self.connections.iter_mut() {
                conn.send_disconnect_request(&mut env);
            }
        }

        let updates = ctx.take_updates();
        self.fan_out(ctx, &updates);
        self.forward_logs(ctx);

        let mut env = ConnectionEnv {
            config: &self.config,
            ctx: &mut *ctx,
            arena: &mut self.arena,
            keys: &mut self.keys,
        };
        for conn in self.connections.iter_mut().filter(|c| !c.is_removed()) {
            conn.tick(&mut env);
        }

        self.sweep(ctx);
    }

    fn dump_config(&self) {
        info!("API Server:");
        info!("  Address: {}", self.listener.local_name());
        info!("  Noise encryption: {}", if self.keys.noise().has_psk() { "YES" } else { "NO" });
        info!("  Password: {}", if self.config.uses_password() { "YES" } else { "NO" });
        info!("  Clients: {}/{}", self.connections.len(), self.config.max_connections);
    }
}
