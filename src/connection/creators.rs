//! Per-kind message encoders.
//!
//! Dispatch is a table lookup by [`EntityKind`], never a match on the
//! concrete entity at the call site.  Every creator has the
//! [`CreatorFn`] shape so it can sit in a batch slot.

use crate::entity::{Entity, EntityData, EntityKind};
use crate::proto::ProtoMessage;
use crate::proto::messages::*;

use super::batch::{CreatorFn, MessageWriter};

/// Encoder set for one entity kind.
pub struct KindEncoders {
    pub info: CreatorFn,
    pub info_type: u8,
    pub info_size: u8,
    /// `None` for kinds without a state message.
    pub state: Option<StateEncoder>,
}

pub struct StateEncoder {
    pub create: CreatorFn,
    pub message_type: u8,
    pub estimated_size: u8,
    /// Bypass batching whenever the socket is writable.
    pub immediate: bool,
}

macro_rules! kind {
    ($info:ident: $info_msg:ty) => {
        KindEncoders {
            info: $info,
            info_type: <$info_msg>::MESSAGE_TYPE,
            info_size: <$info_msg>::ESTIMATED_SIZE,
            state: None,
        }
    };
    ($info:ident: $info_msg:ty, $state:ident: $state_msg:ty, immediate = $imm:expr) => {
        KindEncoders {
            info: $info,
            info_type: <$info_msg>::MESSAGE_TYPE,
            info_size: <$info_msg>::ESTIMATED_SIZE,
            state: Some(StateEncoder {
                create: $state,
                message_type: <$state_msg>::MESSAGE_TYPE,
                estimated_size: <$state_msg>::ESTIMATED_SIZE,
                immediate: $imm,
            }),
        }
    };
}

/// Indexed by `EntityKind::index()`.
static ENCODERS: [KindEncoders; EntityKind::COUNT] = [
    kind!(binary_sensor_info: ListEntitiesBinarySensorResponse,
          binary_sensor_state: BinarySensorStateResponse, immediate = false),
    kind!(sensor_info: ListEntitiesSensorResponse,
          sensor_state: SensorStateResponse, immediate = false),
    kind!(switch_info: ListEntitiesSwitchResponse,
          switch_state: SwitchStateResponse, immediate = false),
    kind!(text_sensor_info: ListEntitiesTextSensorResponse,
          text_sensor_state: TextSensorStateResponse, immediate = false),
    kind!(button_info: ListEntitiesButtonResponse),
    kind!(event_info: ListEntitiesEventResponse),
    kind!(update_info: ListEntitiesUpdateResponse,
          update_state: UpdateStateResponse, immediate = true),
];

pub fn encoders(kind: EntityKind) -> &'static KindEncoders {
    &ENCODERS[kind.index()]
}

/// Fill the fields every `ListEntities*Response` shares.
macro_rules! info_message {
    ($ty:ident, $e:expr, { $($field:ident: $value:expr),* $(,)? }) => {
        $ty {
            object_id: $e.info.object_id.clone(),
            key: $e.info.key,
            name: $e.info.name.clone(),
            icon: $e.info.icon.clone(),
            disabled_by_default: $e.info.disabled_by_default,
            entity_category: $e.info.category as u32,
            device_id: $e.info.device_id,
            $($field: $value,)*
        }
    };
}

// ── Info ──────────────────────────────────────────────────────

fn binary_sensor_info(entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    let EntityData::BinarySensor { is_status, .. } = &e.data else { return 0 };
    w.encode(&info_message!(ListEntitiesBinarySensorResponse, e, {
        device_class: e.info.device_class.clone(),
        is_status_binary_sensor: *is_status,
    }))
}

fn sensor_info(entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    let EntityData::Sensor {
        unit,
        accuracy_decimals,
        force_update,
        state_class,
        ..
    } = &e.data
    else {
        return 0;
    };
    w.encode(&info_message!(ListEntitiesSensorResponse, e, {
        unit_of_measurement: unit.clone(),
        accuracy_decimals: *accuracy_decimals,
        force_update: *force_update,
        device_class: e.info.device_class.clone(),
        state_class: *state_class as u32,
    }))
}

fn switch_info(entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    let EntityData::Switch { assumed_state, .. } = &e.data else { return 0 };
    w.encode(&info_message!(ListEntitiesSwitchResponse, e, {
        assumed_state: *assumed_state,
        device_class: e.info.device_class.clone(),
    }))
}

fn text_sensor_info(entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    w.encode(&info_message!(ListEntitiesTextSensorResponse, e, {
        device_class: e.info.device_class.clone(),
    }))
}

fn button_info(entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    w.encode(&info_message!(ListEntitiesButtonResponse, e, {
        device_class: e.info.device_class.clone(),
    }))
}

fn event_info(entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    let EntityData::Event { event_types } = &e.data else { return 0 };
    w.encode(&info_message!(ListEntitiesEventResponse, e, {
        device_class: e.info.device_class.clone(),
        event_types: event_types.clone(),
    }))
}

fn update_info(entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    w.encode(&info_message!(ListEntitiesUpdateResponse, e, {
        device_class: e.info.device_class.clone(),
    }))
}

// ── State ─────────────────────────────────────────────────────

pub fn binary_sensor_state(entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    let EntityData::BinarySensor { state, .. } = &e.data else { return 0 };
    w.encode(&BinarySensorStateResponse {
        key: e.key(),
        state: state.unwrap_or(false),
        missing_state: state.is_none(),
        device_id: e.device_id(),
    })
}

pub fn sensor_state(entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    let EntityData::Sensor { state, .. } = &e.data else { return 0 };
    w.encode(&SensorStateResponse {
        key: e.key(),
        state: state.unwrap_or(f32::NAN),
        missing_state: state.is_none(),
        device_id: e.device_id(),
    })
}

pub fn switch_state(entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    let EntityData::Switch { state, .. } = &e.data else { return 0 };
    w.encode(&SwitchStateResponse {
        key: e.key(),
        state: *state,
        device_id: e.device_id(),
    })
}

pub fn text_sensor_state(entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    let EntityData::TextSensor { state } = &e.data else { return 0 };
    w.encode(&TextSensorStateResponse {
        key: e.key(),
        state: state.clone().unwrap_or_default(),
        missing_state: state.is_none(),
        device_id: e.device_id(),
    })
}

pub fn update_state(entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    let EntityData::Update { info, has_state } = &e.data else { return 0 };
    w.encode(&UpdateStateResponse {
        key: e.key(),
        missing_state: !*has_state,
        in_progress: info.in_progress,
        has_progress: info.has_progress,
        progress: info.progress,
        current_version: info.current_version.clone(),
        latest_version: info.latest_version.clone(),
        title: info.title.clone(),
        release_summary: info.release_summary.clone(),
        release_url: info.release_url.clone(),
        device_id: e.device_id(),
    })
}

/// Owned-string creator for [`MessageCreator::Event`](super::batch::MessageCreator::Event).
pub fn event_response(entity: Option<&Entity>, event_type: &str, w: &mut MessageWriter<'_>) -> u16 {
    let Some(e) = entity else { return 0 };
    w.encode(&EventResponse {
        key: e.key(),
        event_type: event_type.to_owned(),
        device_id: e.device_id(),
    })
}

// ── Connection-level ──────────────────────────────────────────

pub fn list_entities_done(_: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    w.encode(&ListEntitiesDoneResponse::default())
}

pub fn ping_request(_: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    w.encode(&PingRequest::default())
}

pub fn disconnect_request(_: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
    w.encode(&DisconnectRequest::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityInfo, UpdateInfo};
    use crate::proto::ProtoDecodable;

    fn encode_with(f: CreatorFn, e: &Entity) -> Vec<u8> {
        let mut arena = Vec::new();
        let total = f(Some(e), &mut MessageWriter::single(&mut arena, 0, 0));
        assert_eq!(usize::from(total), arena.len());
        arena
    }

    #[test]
    fn table_matches_kinds() {
        assert_eq!(encoders(EntityKind::Sensor).info_type, 16);
        assert_eq!(encoders(EntityKind::Button).info_type, 61);
        assert!(encoders(EntityKind::Button).state.is_none());
        assert!(encoders(EntityKind::Event).state.is_none());
        let update = encoders(EntityKind::Update).state.as_ref().unwrap();
        assert!(update.immediate);
        assert_eq!(update.message_type, 117);
        assert!(!encoders(EntityKind::Switch).state.as_ref().unwrap().immediate);
    }

    #[test]
    fn info_carries_common_fields() {
        let mut info = EntityInfo::new("relay", "Relay").with_icon("mdi:power");
        info.device_id = 3;
        let e = Entity::new(info, EntityData::Switch { state: true, assumed_state: true });
        let bytes = encode_with(encoders(EntityKind::Switch).info, &e);
        let msg = ListEntitiesSwitchResponse::decode(&bytes).unwrap();
        assert_eq!(msg.object_id, "relay");
        assert_eq!(msg.key, e.key());
        assert_eq!(msg.icon, "mdi:power");
        assert!(msg.assumed_state);
        assert_eq!(msg.device_id, 3);
    }

    #[test]
    fn missing_text_state_is_flagged() {
        let e = Entity::new(EntityInfo::new("t", "T"), EntityData::TextSensor { state: None });
        let bytes = encode_with(text_sensor_state, &e);
        let msg = TextSensorStateResponse::decode(&bytes).unwrap();
        assert!(msg.missing_state);
        assert!(msg.state.is_empty());
    }

    #[test]
    fn update_state_reports_progress() {
        let e = Entity::new(
            EntityInfo::new("fw", "Firmware"),
            EntityData::Update {
                info: UpdateInfo {
                    in_progress: true,
                    has_progress: true,
                    progress: 42.0,
                    latest_version: "2.0".into(),
                    ..Default::default()
                },
                has_state: true,
            },
        );
        let bytes = encode_with(update_state, &e);
        let msg = UpdateStateResponse::decode(&bytes).unwrap();
        assert!(msg.in_progress);
        assert_eq!(msg.progress, 42.0);
        assert_eq!(msg.latest_version, "2.0");
        assert!(!msg.missing_state);
    }

    #[test]
    fn wrong_kind_encodes_nothing() {
        let e = Entity::new(EntityInfo::new("b", "B"), EntityData::Button);
        let mut arena = Vec::new();
        assert_eq!(sensor_state(Some(&e), &mut MessageWriter::single(&mut arena, 6, 0)), 0);
        assert_eq!(sensor_state(None, &mut MessageWriter::single(&mut arena, 6, 0)), 0);
    }
}
