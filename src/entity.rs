//! Entity registry — the key→entity lookup the API core serves from.
//!
//! Every entity shares one small capability surface ([`EntityInfo`]:
//! key, object id, name, icon, category, device id) plus a per-kind state
//! value ([`EntityData`]).  The connection layer never matches on concrete
//! entity types; it indexes the encoder tables in
//! [`creators`](crate::connection::creators) with [`EntityKind`].
//!
//! Entities are added once at startup and never removed, so a key stays
//! valid for the process lifetime.

use std::collections::HashMap;

use log::warn;

/// Fixed set of entity kinds the encoder tables cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntityKind {
    BinarySensor = 0,
    Sensor = 1,
    Switch = 2,
    TextSensor = 3,
    Button = 4,
    Event = 5,
    Update = 6,
}

impl EntityKind {
    pub const COUNT: usize = 7;

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Kinds with a state message.
    pub const fn has_state_message(self) -> bool {
        !matches!(self, Self::Button | Self::Event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum EntityCategory {
    #[default]
    None = 0,
    Config = 1,
    Diagnostic = 2,
}

/// Sensor state class, carried on the wire as `uint32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum StateClass {
    #[default]
    None = 0,
    Measurement = 1,
    TotalIncreasing = 2,
    Total = 3,
}

/// Update command, as sent in `UpdateCommandRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCommand {
    None,
    Update,
    Check,
}

impl UpdateCommand {
    pub fn from_wire(v: u32) -> Self {
        match v {
            1 => Self::Update,
            2 => Self::Check,
            _ => Self::None,
        }
    }
}

/// Capability surface shared by every entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityInfo {
    pub object_id: String,
    /// `fnv1(object_id)` unless set explicitly.
    pub key: u32,
    pub name: String,
    pub icon: String,
    pub device_class: String,
    pub category: EntityCategory,
    pub disabled_by_default: bool,
    /// Internal entities are never exposed to clients.
    pub internal: bool,
    pub device_id: u32,
}

impl EntityInfo {
    pub fn new(object_id: impl Into<String>, name: impl Into<String>) -> Self {
        let object_id = object_id.into();
        Self {
            key: fnv1_hash(&object_id),
            object_id,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn with_device_class(mut self, class: impl Into<String>) -> Self {
        self.device_class = class.into();
        self
    }

    pub fn with_category(mut self, category: EntityCategory) -> Self {
        self.category = category;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateInfo {
    pub in_progress: bool,
    pub has_progress: bool,
    pub progress: f32,
    pub current_version: String,
    pub latest_version: String,
    pub title: String,
    pub release_summary: String,
    pub release_url: String,
}

/// Per-kind configuration and current state.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    BinarySensor {
        state: Option<bool>,
        is_status: bool,
    },
    Sensor {
        state: Option<f32>,
        unit: String,
        accuracy_decimals: i32,
        force_update: bool,
        state_class: StateClass,
    },
    Switch {
        state: bool,
        assumed_state: bool,
    },
    TextSensor {
        state: Option<String>,
    },
    Button,
    Event {
        event_types: Vec<String>,
    },
    Update {
        info: UpdateInfo,
        has_state: bool,
    },
}

impl EntityData {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::BinarySensor { .. } => EntityKind::BinarySensor,
            Self::Sensor { .. } => EntityKind::Sensor,
            Self::Switch { .. } => EntityKind::Switch,
            Self::TextSensor { .. } => EntityKind::TextSensor,
            Self::Button => EntityKind::Button,
            Self::Event { .. } => EntityKind::Event,
            Self::Update { .. } => EntityKind::Update,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub info: EntityInfo,
    pub data: EntityData,
}

impl Entity {
    pub fn new(info: EntityInfo, data: EntityData) -> Self {
        Self { info, data }
    }

    pub fn key(&self) -> u32 {
        self.info.key
    }

    pub fn device_id(&self) -> u32 {
        self.info.device_id
    }

    pub fn kind(&self) -> EntityKind {
        self.data.kind()
    }

    pub fn has_state(&self) -> bool {
        match &self.data {
            EntityData::BinarySensor { state, .. } => state.is_some(),
            EntityData::Sensor { state, .. } => state.is_some(),
            EntityData::Switch { .. } => true,
            EntityData::TextSensor { state } => state.is_some(),
            EntityData::Button | EntityData::Event { .. } => false,
            EntityData::Update { has_state, .. } => *has_state,
        }
    }
}

/// A client command routed to an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityCommand {
    Switch { key: u32, state: bool },
    Button { key: u32 },
    Update { key: u32, command: UpdateCommand },
}

impl EntityCommand {
    pub fn key(&self) -> u32 {
        match self {
            Self::Switch { key, .. } | Self::Button { key } | Self::Update { key, .. } => *key,
        }
    }
}

/// Something the server must fan out to subscribed connections.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityUpdate {
    State(u32),
    Event { key: u32, event_type: String },
}

// ───────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: Vec<Entity>,
    by_key: HashMap<u32, usize>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity.  Returns its key, or `None` when the key is
    /// already taken.
    pub fn add(&mut self, entity: Entity) -> Option<u32> {
        let key = entity.key();
        if self.by_key.contains_key(&key) {
            warn!("Duplicate entity key {:#010x} ({})", key, entity.info.object_id);
            return None;
        }
        self.by_key.insert(key, self.entities.len());
        self.entities.push(entity);
        Some(key)
    }

    pub fn get(&self, key: u32) -> Option<&Entity> {
        self.by_key.get(&key).map(|&i| &self.entities[i])
    }

    pub fn get_mut(&mut self, key: u32) -> Option<&mut Entity> {
        self.by_key.get(&key).map(|&i| &mut self.entities[i])
    }

    /// Entity at registration position `index`.
    pub fn at(&self, index: usize) -> Option<&Entity> {
        self.entities.get(index)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    /// Apply a client command to local state.  Returns `true` when the
    /// visible state changed and must be published.
    pub fn apply_command(&mut self, cmd: &EntityCommand) -> bool {
        let Some(entity) = self.get_mut(cmd.key()) else {
            return false;
        };
        match (cmd, &mut entity.data) {
            (EntityCommand::Switch { state: new, .. }, EntityData::Switch { state, assumed_state }) => {
                // Assumed-state switches have no feedback; the owner publishes.
                if *assumed_state || *state == *new {
                    return false;
                }
                *state = *new;
                true
            }
            _ => false,
        }
    }
}

/// 32-bit FNV-1 (multiply, then xor).
pub fn fnv1_hash(s: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for &b in s.as_bytes() {
        hash = hash.wrapping_mul(16_777_619);
        hash ^= u32::from(b);
    }
    hash
}
