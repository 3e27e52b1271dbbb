//! Keepalive pings and dead-peer teardown.

use native_api::app::events::ApiEvent;
use native_api::config::ApiConfig;
use native_api::proto::ProtoMessage;
use native_api::proto::messages::*;

use crate::mock_net::{Node, PlainClient, types};

fn idle_client() -> (Node, PlainClient) {
    let (mut node, _) = Node::standard(ApiConfig::default());
    let client = PlainClient::new(node.connect());
    client.hello();
    node.run();
    client.recv();
    node.events();
    (node, client)
}

#[test]
fn silent_peer_is_pinged_then_dropped() {
    let (mut node, client) = idle_client();

    node.step(60_000);
    assert!(client.recv().is_empty());
    node.step(1);
    assert_eq!(types(&client.recv()), [PingRequest::MESSAGE_TYPE]);

    // one ping outstanding, no repeats
    node.step(45_000);
    assert!(client.recv().is_empty());

    node.step(44_999);
    assert_eq!(client.wire.borrow().close_calls, 0);
    node.step(1);
    assert_eq!(client.wire.borrow().close_calls, 1);
    assert!(node
        .events()
        .iter()
        .any(|e| matches!(e, ApiEvent::ClientDisconnected { .. })));
}

#[test]
fn ping_response_keeps_connection_alive() {
    let (mut node, client) = idle_client();

    node.step(60_001);
    assert_eq!(types(&client.recv()), [PingRequest::MESSAGE_TYPE]);
    client.send(&PingResponse::default());
    node.run();

    node.step(90_000);
    assert_eq!(client.wire.borrow().close_calls, 0);
    assert_eq!(types(&client.recv()), [PingRequest::MESSAGE_TYPE]);
}

#[test]
fn any_inbound_traffic_resets_idle_timer() {
    let (mut node, client) = idle_client();

    node.step(50_000);
    client.send(&PingRequest::default());
    node.run();
    assert_eq!(types(&client.recv()), [PingResponse::MESSAGE_TYPE]);

    node.step(50_000);
    assert!(client.recv().is_empty());
    node.step(10_001);
    assert_eq!(types(&client.recv()), [PingRequest::MESSAGE_TYPE]);
}

#[test]
fn keepalive_follows_configuration() {
    let config = ApiConfig {
        keepalive_ms: 5_000,
        ..ApiConfig::default()
    };
    let (mut node, _) = Node::standard(config);
    let client = PlainClient::new(node.connect());
    client.hello();
    node.run();
    client.recv();

    node.step(5_001);
    assert_eq!(types(&client.recv()), [PingRequest::MESSAGE_TYPE]);
    node.step(7_500);
    assert_eq!(client.wire.borrow().close_calls, 1);
}
