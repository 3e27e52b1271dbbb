//! Outbound batching: coalescing window, per-entity dedup, immediate
//! sends and multi-packet flushes.

use native_api::config::ApiConfig;
use native_api::entity::{Entity, EntityData, EntityInfo};
use native_api::proto::messages::*;
use native_api::proto::{ProtoDecodable, ProtoMessage};

use crate::mock_net::{Node, PlainClient, TEMPERATURE_KEY, populate, types};

fn subscribed(node: &mut Node) -> PlainClient {
    let client = PlainClient::new(node.connect());
    client.hello();
    client.send(&SubscribeStatesRequest::default());
    node.settle();
    client.recv();
    client
}

#[test]
fn rapid_updates_collapse_to_last_value() {
    let (mut node, _) = Node::standard(ApiConfig::default());
    let client = subscribed(&mut node);

    for v in [1.0, 2.0, 3.0] {
        node.ctx().publish_sensor(TEMPERATURE_KEY, v);
    }
    node.run();
    node.step(99);
    assert!(client.recv().is_empty(), "inside the batch window");

    node.step(1);
    let frames = client.recv();
    assert_eq!(types(&frames), [SensorStateResponse::MESSAGE_TYPE]);
    let state = SensorStateResponse::decode(&frames[0].1).unwrap();
    assert_eq!(state.key, 0xDEAD_BEEF);
    assert_eq!(state.state, 3.0);

    node.settle();
    assert!(client.recv().is_empty());
}

#[test]
fn distinct_entities_share_one_flush() {
    let (mut node, keys) = Node::standard(ApiConfig::default());
    let client = subscribed(&mut node);

    node.ctx().publish_sensor(keys.temperature, 25.5);
    node.ctx().publish_switch(keys.relay, true);
    node.ctx().publish_sensor(keys.temperature, 26.0);
    node.run();
    node.step(100);

    let frames = client.recv();
    assert_eq!(
        types(&frames),
        [SensorStateResponse::MESSAGE_TYPE, SwitchStateResponse::MESSAGE_TYPE]
    );
    assert_eq!(SensorStateResponse::decode(&frames[0].1).unwrap().state, 26.0);
    assert!(SwitchStateResponse::decode(&frames[1].1).unwrap().state);
}

#[test]
fn zero_delay_sends_immediately_after_initial_states() {
    let config = ApiConfig {
        batch_delay_ms: 0,
        ..ApiConfig::default()
    };
    let (mut node, keys) = Node::standard(config);
    let client = subscribed(&mut node);

    node.ctx().publish_switch(keys.relay, true);
    node.run();
    let frames = client.recv();
    assert_eq!(types(&frames), [SwitchStateResponse::MESSAGE_TYPE]);
}

#[test]
fn unsubscribed_client_gets_nothing() {
    let (mut node, keys) = Node::standard(ApiConfig::default());
    let client = PlainClient::new(node.connect());
    client.hello();
    node.run();
    client.recv();

    node.ctx().publish_switch(keys.relay, true);
    node.settle();
    assert!(client.recv().is_empty());
}

#[test]
fn large_initial_state_spans_several_packets() {
    const COUNT: usize = 40;
    let mut node = Node::new(ApiConfig::default(), |ctx| {
        populate(ctx);
        for i in 0..COUNT {
            ctx.add_entity(Entity::new(
                EntityInfo::new(format!("text_{i}"), format!("Text {i}")),
                EntityData::TextSensor {
                    state: Some("x".repeat(60)),
                },
            ));
        }
    });
    let client = PlainClient::new(node.connect());
    client.hello();
    client.send(&SubscribeStatesRequest::default());
    node.settle();
    node.settle();

    let frames = client.recv();
    let texts: Vec<_> = frames
        .iter()
        .filter(|(t, _)| *t == TextSensorStateResponse::MESSAGE_TYPE)
        .map(|(_, p)| TextSensorStateResponse::decode(p).unwrap())
        .collect();
    assert_eq!(texts.len(), COUNT);
    assert!(texts.iter().all(|t| t.state.len() == 60 && !t.missing_state));
}

#[test]
fn list_entities_does_not_block_pings() {
    let (mut node, _) = Node::standard(ApiConfig::default());
    let client = PlainClient::new(node.connect());
    client.hello();
    node.run();
    client.recv();

    client.send(&ListEntitiesRequest::default());
    client.send(&PingRequest::default());
    node.run();
    let frames = client.recv();
    assert_eq!(types(&frames), [PingResponse::MESSAGE_TYPE]);

    node.settle();
    let frames = client.recv();
    assert_eq!(
        frames.last().map(|(t, _)| *t),
        Some(ListEntitiesDoneResponse::MESSAGE_TYPE)
    );
}
