//! Native API message catalog.
//!
//! Type tags and field numbers are the wire contract shared with every
//! client; never renumber.  Enum-typed fields travel as `uint32` and are
//! converted by the entity layer.

use super::{
    proto_field_decode, proto_field_encode, proto_field_size, proto_field_type, proto_message,
};

/// Protocol version reported in [`HelloResponse`].
pub const API_VERSION_MAJOR: u32 = 1;
pub const API_VERSION_MINOR: u32 = 12;

// ── Connection setup ──────────────────────────────────────────

proto_message! {
    HelloRequest = 1, estimated 17 {
        1 => client_info: string,
        2 => api_version_major: uint32,
        3 => api_version_minor: uint32,
    }
}

proto_message! {
    HelloResponse = 2, estimated 26 {
        1 => api_version_major: uint32,
        2 => api_version_minor: uint32,
        3 => server_info: string,
        4 => name: string,
    }
}

proto_message! {
    ConnectRequest = 3, estimated 9 {
        1 => password: string,
    }
}

proto_message! {
    ConnectResponse = 4, estimated 2 {
        1 => invalid_password: bool,
    }
}

proto_message! {
    DisconnectRequest = 5, estimated 0 {}
}

proto_message! {
    DisconnectResponse = 6, estimated 0 {}
}

proto_message! {
    PingRequest = 7, estimated 0 {}
}

proto_message! {
    PingResponse = 8, estimated 0 {}
}

proto_message! {
    DeviceInfoRequest = 9, estimated 0 {}
}

proto_message! {
    DeviceInfoResponse = 10, estimated 127 {
        1 => uses_password: bool,
        2 => name: string,
        3 => mac_address: string,
        4 => esphome_version: string,
        5 => compilation_time: string,
        6 => model: string,
        12 => manufacturer: string,
        13 => friendly_name: string,
        19 => api_encryption_supported: bool,
    }
}

// ── Entity enumeration ────────────────────────────────────────

proto_message! {
    ListEntitiesRequest = 11, estimated 0 {}
}

proto_message! {
    ListEntitiesBinarySensorResponse = 12, estimated 60 {
        1 => object_id: string,
        2 => key: fixed32,
        3 => name: string,
        5 => device_class: string,
        6 => is_status_binary_sensor: bool,
        7 => disabled_by_default: bool,
        8 => icon: string,
        9 => entity_category: uint32,
        10 => device_id: uint32,
    }
}

proto_message! {
    ListEntitiesSensorResponse = 16, estimated 86 {
        1 => object_id: string,
        2 => key: fixed32,
        3 => name: string,
        5 => icon: string,
        6 => unit_of_measurement: string,
        7 => accuracy_decimals: int32,
        8 => force_update: bool,
        9 => device_class: string,
        10 => state_class: uint32,
        12 => disabled_by_default: bool,
        13 => entity_category: uint32,
        14 => device_id: uint32,
    }
}

proto_message! {
    ListEntitiesSwitchResponse = 17, estimated 60 {
        1 => object_id: string,
        2 => key: fixed32,
        3 => name: string,
        5 => icon: string,
        6 => assumed_state: bool,
        7 => disabled_by_default: bool,
        8 => entity_category: uint32,
        9 => device_class: string,
        10 => device_id: uint32,
    }
}

proto_message! {
    ListEntitiesTextSensorResponse = 18, estimated 56 {
        1 => object_id: string,
        2 => key: fixed32,
        3 => name: string,
        5 => icon: string,
        6 => disabled_by_default: bool,
        7 => entity_category: uint32,
        8 => device_class: string,
        9 => device_id: uint32,
    }
}

proto_message! {
    ListEntitiesDoneResponse = 19, estimated 0 {}
}

proto_message! {
    ListEntitiesButtonResponse = 61, estimated 56 {
        1 => object_id: string,
        2 => key: fixed32,
        3 => name: string,
        5 => icon: string,
        6 => disabled_by_default: bool,
        7 => entity_category: uint32,
        8 => device_class: string,
        9 => device_id: uint32,
    }
}

proto_message! {
    ListEntitiesEventResponse = 107, estimated 76 {
        1 => object_id: string,
        2 => key: fixed32,
        3 => name: string,
        5 => icon: string,
        6 => disabled_by_default: bool,
        7 => entity_category: uint32,
        8 => device_class: string,
        9 => event_types: repeated_string,
        10 => device_id: uint32,
    }
}

proto_message! {
    ListEntitiesUpdateResponse = 116, estimated 56 {
        1 => object_id: string,
        2 => key: fixed32,
        3 => name: string,
        5 => icon: string,
        6 => disabled_by_default: bool,
        7 => entity_category: uint32,
        8 => device_class: string,
        9 => device_id: uint32,
    }
}

// ── State streaming ───────────────────────────────────────────

proto_message! {
    SubscribeStatesRequest = 20, estimated 0 {}
}

proto_message! {
    BinarySensorStateResponse = 21, estimated 13 {
        1 => key: fixed32,
        2 => state: bool,
        3 => missing_state: bool,
        4 => device_id: uint32,
    }
}

proto_message! {
    SensorStateResponse = 25, estimated 16 {
        1 => key: fixed32,
        2 => state: float,
        3 => missing_state: bool,
        4 => device_id: uint32,
    }
}

proto_message! {
    SwitchStateResponse = 26, estimated 11 {
        1 => key: fixed32,
        2 => state: bool,
        3 => device_id: uint32,
    }
}

proto_message! {
    TextSensorStateResponse = 27, estimated 20 {
        1 => key: fixed32,
        2 => state: string,
        3 => missing_state: bool,
        4 => device_id: uint32,
    }
}

proto_message! {
    EventResponse = 108, estimated 18 {
        1 => key: fixed32,
        2 => event_type: string,
        3 => device_id: uint32,
    }
}

proto_message! {
    UpdateStateResponse = 117, estimated 65 {
        1 => key: fixed32,
        2 => missing_state: bool,
        3 => in_progress: bool,
        4 => has_progress: bool,
        5 => progress: float,
        6 => current_version: string,
        7 => latest_version: string,
        8 => title: string,
        9 => release_summary: string,
        10 => release_url: string,
        11 => device_id: uint32,
    }
}

// ── Logs ──────────────────────────────────────────────────────

proto_message! {
    SubscribeLogsRequest = 28, estimated 4 {
        1 => level: uint32,
        2 => dump_config: bool,
    }
}

proto_message! {
    SubscribeLogsResponse = 29, estimated 13 {
        1 => level: uint32,
        3 => message: bytes,
    }
}

// ── Commands ──────────────────────────────────────────────────

proto_message! {
    SwitchCommandRequest = 33, estimated 11 {
        1 => key: fixed32,
        2 => state: bool,
        3 => device_id: uint32,
    }
}

proto_message! {
    ButtonCommandRequest = 62, estimated 9 {
        1 => key: fixed32,
        2 => device_id: uint32,
    }
}

proto_message! {
    UpdateCommandRequest = 118, estimated 11 {
        1 => key: fixed32,
        2 => command: uint32,
        3 => device_id: uint32,
    }
}

// ── Time ──────────────────────────────────────────────────────

proto_message! {
    GetTimeRequest = 36, estimated 0 {}
}

proto_message! {
    GetTimeResponse = 37, estimated 5 {
        1 => epoch_seconds: fixed32,
    }
}

// ── Encryption ────────────────────────────────────────────────

proto_message! {
    /// `key` is the new 32-byte PSK, base64 encoded.
    NoiseEncryptionSetKeyRequest = 124, estimated 19 {
        1 => key: string,
    }
}

proto_message! {
    NoiseEncryptionSetKeyResponse = 125, estimated 2 {
        1 => success: bool,
    }
}
