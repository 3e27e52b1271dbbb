//! End-to-end plaintext sessions: hello, password, entity listing,
//! commands and teardown.

use native_api::app::events::ApiEvent;
use native_api::config::ApiConfig;
use native_api::entity::EntityCommand;
use native_api::proto::messages::*;
use native_api::proto::{ProtoDecodable, ProtoMessage};

use crate::mock_net::{Node, PlainClient, types};

fn authenticated(node: &mut Node) -> PlainClient {
    let client = PlainClient::new(node.connect());
    client.hello();
    node.run();
    client.recv();
    node.events();
    client
}

#[test]
fn hello_round_trip_authenticates() {
    let (mut node, _) = Node::standard(ApiConfig::default());
    let client = PlainClient::new(node.connect());
    client.hello();
    node.run();

    let frames = client.recv();
    assert_eq!(
        types(&frames),
        [HelloResponse::MESSAGE_TYPE, GetTimeRequest::MESSAGE_TYPE]
    );
    let hello = HelloResponse::decode(&frames[0].1).unwrap();
    assert_eq!((hello.api_version_major, hello.api_version_minor), (1, 12));
    assert_eq!(hello.name, "native-api-node");
    assert_eq!(hello.server_info, ApiConfig::default().server_info);

    let events = node.events();
    assert!(events.iter().any(
        |e| matches!(e, ApiEvent::ClientConnected { name, peer } if name == "test" && peer.starts_with("10.0.0.2:"))
    ));
}

#[test]
fn password_flow() {
    let config = ApiConfig {
        password: Some("hunter2".into()),
        ..ApiConfig::default()
    };
    let (mut node, _) = Node::standard(config);
    let client = PlainClient::new(node.connect());
    client.hello();
    node.run();
    assert_eq!(types(&client.recv()), [HelloResponse::MESSAGE_TYPE]);

    client.send(&DeviceInfoRequest::default());
    node.run();
    let frames = client.recv();
    let info = DeviceInfoResponse::decode(&frames[0].1).unwrap();
    assert!(info.uses_password);
    assert!(!info.api_encryption_supported);

    client.send(&ConnectRequest {
        password: "letmein".into(),
    });
    node.run();
    let frames = client.recv();
    assert!(ConnectResponse::decode(&frames[0].1).unwrap().invalid_password);
    assert_eq!(client.wire.borrow().close_calls, 0, "wrong password keeps the socket");

    client.send(&ConnectRequest {
        password: "hunter2".into(),
    });
    node.run();
    let frames = client.recv();
    assert_eq!(
        types(&frames),
        [ConnectResponse::MESSAGE_TYPE, GetTimeRequest::MESSAGE_TYPE]
    );
    assert!(!ConnectResponse::decode(&frames[0].1).unwrap().invalid_password);
}

#[test]
fn command_before_authentication_drops_connection() {
    let (mut node, keys) = Node::standard(ApiConfig::default());
    let client = PlainClient::new(node.connect());
    client.send(&SwitchCommandRequest {
        key: keys.relay,
        state: true,
        device_id: 0,
    });
    node.run();
    assert_eq!(client.wire.borrow().close_calls, 1);
    assert!(node.events().is_empty(), "no command, no disconnect event");
}

#[test]
fn list_entities_then_done() {
    let (mut node, keys) = Node::standard(ApiConfig::default());
    let client = authenticated(&mut node);

    client.send(&ListEntitiesRequest::default());
    node.settle();
    let frames = client.recv();
    assert_eq!(
        types(&frames),
        [
            ListEntitiesSwitchResponse::MESSAGE_TYPE,
            ListEntitiesSensorResponse::MESSAGE_TYPE,
            ListEntitiesButtonResponse::MESSAGE_TYPE,
            ListEntitiesEventResponse::MESSAGE_TYPE,
            ListEntitiesDoneResponse::MESSAGE_TYPE,
        ]
    );
    let sensor = ListEntitiesSensorResponse::decode(&frames[1].1).unwrap();
    assert_eq!(sensor.key, keys.temperature);
    assert_eq!(sensor.unit_of_measurement, "°C");
    let event = ListEntitiesEventResponse::decode(&frames[3].1).unwrap();
    assert_eq!(event.event_types, ["ring"]);
}

#[test]
fn subscribe_states_sends_current_values() {
    let (mut node, keys) = Node::standard(ApiConfig::default());
    let client = authenticated(&mut node);

    client.send(&SubscribeStatesRequest::default());
    node.settle();
    let frames = client.recv();
    assert_eq!(
        types(&frames),
        [
            SwitchStateResponse::MESSAGE_TYPE,
            SensorStateResponse::MESSAGE_TYPE
        ]
    );
    let sensor = SensorStateResponse::decode(&frames[1].1).unwrap();
    assert_eq!(sensor.key, keys.temperature);
    assert_eq!(sensor.state, 20.0);
    assert!(!sensor.missing_state);
}

#[test]
fn switch_command_updates_state_and_notifies() {
    let (mut node, keys) = Node::standard(ApiConfig::default());
    let client = authenticated(&mut node);
    client.send(&SubscribeStatesRequest::default());
    node.settle();
    client.recv();

    client.send(&SwitchCommandRequest {
        key: keys.relay,
        state: true,
        device_id: 0,
    });
    node.run();
    assert!(node.events().contains(&ApiEvent::Command(EntityCommand::Switch {
        key: keys.relay,
        state: true
    })));

    node.settle();
    let frames = client.recv();
    assert_eq!(types(&frames), [SwitchStateResponse::MESSAGE_TYPE]);
    let state = SwitchStateResponse::decode(&frames[0].1).unwrap();
    assert_eq!(state.key, keys.relay);
    assert!(state.state);
}

#[test]
fn button_press_and_event_reach_every_subscriber() {
    let (mut node, keys) = Node::standard(ApiConfig::default());
    let first = authenticated(&mut node);
    let second = authenticated(&mut node);
    for c in [&first, &second] {
        c.send(&SubscribeStatesRequest::default());
    }
    node.settle();
    first.recv();
    second.recv();

    first.send(&ButtonCommandRequest {
        key: keys.ring,
        device_id: 0,
    });
    node.run();
    assert!(node
        .events()
        .contains(&ApiEvent::Command(EntityCommand::Button { key: keys.ring })));

    node.ctx().trigger_event(keys.doorbell, "ring");
    node.settle();
    for c in [&first, &second] {
        let frames = c.recv();
        assert_eq!(types(&frames), [EventResponse::MESSAGE_TYPE]);
        let ev = EventResponse::decode(&frames[0].1).unwrap();
        assert_eq!((ev.key, ev.event_type.as_str()), (keys.doorbell, "ring"));
    }
}

#[test]
fn time_sync_from_client() {
    let (mut node, _) = Node::standard(ApiConfig::default());
    let client = authenticated(&mut node);
    client.send(&GetTimeResponse {
        epoch_seconds: 1_700_000_000,
    });
    node.run();
    assert!(node.events().contains(&ApiEvent::TimeSynced(1_700_000_000)));

    client.send(&GetTimeRequest::default());
    node.run();
    let frames = client.recv();
    let resp = GetTimeResponse::decode(&frames[0].1).unwrap();
    assert_eq!(resp.epoch_seconds, 1_700_000_000);
}

#[test]
fn client_disconnect_request() {
    let (mut node, _) = Node::standard(ApiConfig::default());
    let client = authenticated(&mut node);

    client.send(&DisconnectRequest::default());
    node.run();
    assert_eq!(types(&client.recv()), [DisconnectResponse::MESSAGE_TYPE]);
    assert_eq!(client.wire.borrow().close_calls, 0);

    node.run();
    assert_eq!(client.wire.borrow().close_calls, 1);
    let events = node.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, ApiEvent::ClientDisconnected { name, .. } if name == "test")));
}

#[test]
fn peer_hangup_removes_connection_once() {
    let (mut node, _) = Node::standard(ApiConfig::default());
    let client = authenticated(&mut node);

    client.wire.borrow_mut().hung_up = true;
    node.run();
    node.settle();
    assert_eq!(client.wire.borrow().close_calls, 1);
    assert_eq!(
        node.events()
            .iter()
            .filter(|e| matches!(e, ApiEvent::ClientDisconnected { .. }))
            .count(),
        1
    );
}

#[test]
fn dump_config_requested_with_log_subscription() {
    let (mut node, _) = Node::standard(ApiConfig::default());
    let client = authenticated(&mut node);
    client.send(&SubscribeLogsRequest {
        level: 3,
        dump_config: true,
    });
    node.run();
    assert!(node.events().contains(&ApiEvent::DumpConfig));
}

#[test]
fn max_connections_enforced() {
    let config = ApiConfig {
        max_connections: 1,
        ..ApiConfig::default()
    };
    let (mut node, _) = Node::standard(config);
    let first = node.connect();
    let second = node.connect();
    node.run();
    assert_eq!(first.borrow().close_calls, 0);
    assert_eq!(second.borrow().close_calls, 1);
}
