//! End-to-end Noise sessions: handshake with the right and wrong PSK,
//! handshake timeout and runtime key rotation.

use base64::Engine;
use native_api::app::events::ApiEvent;
use native_api::config::ApiConfig;
use native_api::proto::messages::*;
use native_api::proto::{ProtoDecodable, ProtoMessage};

use crate::mock_net::{Node, NoiseClient, PlainClient, noise_frames, types};

fn sequential_psk() -> [u8; 32] {
    core::array::from_fn(|i| i as u8)
}

fn noise_config(psk: &[u8; 32]) -> ApiConfig {
    ApiConfig {
        node_name: "node".into(),
        mac_address: "AA:BB".into(),
        encryption_key: Some(base64::engine::general_purpose::STANDARD.encode(psk)),
        ..ApiConfig::default()
    }
}

#[test]
fn handshake_with_correct_psk() {
    let psk = sequential_psk();
    let (mut node, _) = Node::standard(noise_config(&psk));
    let mut client = NoiseClient::begin(node.connect(), &psk);
    node.run();
    let hello = client.finish().expect("handshake");
    assert_eq!(hello, b"\x01node\0AA:BB\0");

    client.send(&ConnectRequest::default());
    node.run();
    let frames = client.recv();
    assert_eq!(
        types(&frames),
        [ConnectResponse::MESSAGE_TYPE, GetTimeRequest::MESSAGE_TYPE]
    );
    assert!(!ConnectResponse::decode(&frames[0].1).unwrap().invalid_password);
    assert!(node
        .events()
        .iter()
        .any(|e| matches!(e, ApiEvent::ClientConnected { .. })));
}

#[test]
fn device_info_advertises_encryption() {
    let psk = sequential_psk();
    let (mut node, _) = Node::standard(noise_config(&psk));
    let mut client = NoiseClient::begin(node.connect(), &psk);
    node.run();
    client.finish().unwrap();

    client.send(&HelloRequest {
        client_info: "noise".into(),
        api_version_major: 1,
        api_version_minor: 10,
    });
    client.send(&DeviceInfoRequest::default());
    node.run();
    let frames = client.recv();
    assert_eq!(frames[0].0, HelloResponse::MESSAGE_TYPE);
    let info = frames
        .iter()
        .find(|(t, _)| *t == DeviceInfoResponse::MESSAGE_TYPE)
        .map(|(_, p)| DeviceInfoResponse::decode(p).unwrap())
        .unwrap();
    assert!(info.api_encryption_supported);
    assert_eq!(info.name, "node");
}

#[test]
fn handshake_with_wrong_psk_is_rejected() {
    let (mut node, _) = Node::standard(noise_config(&sequential_psk()));
    let mut client = NoiseClient::begin(node.connect(), &[0xFF; 32]);
    node.run();

    let reject = client.finish().unwrap_err();
    assert_eq!(reject, b"\x01Handshake MAC failure");
    assert_eq!(client.wire.borrow().close_calls, 1);
    node.settle();
    assert_eq!(client.wire.borrow().close_calls, 1, "closed exactly once");
    assert!(node.events().is_empty());
}

#[test]
fn plaintext_client_against_noise_server() {
    let (mut node, _) = Node::standard(noise_config(&sequential_psk()));
    let client = PlainClient::new(node.connect());
    client.hello();
    node.run();

    let out = core::mem::take(&mut client.wire.borrow_mut().to_client);
    let frames = noise_frames(&out);
    assert_eq!(frames.last().unwrap(), b"\x01Bad indicator byte");
    assert_eq!(client.wire.borrow().close_calls, 1);
}

#[test]
fn stalled_handshake_times_out() {
    let (mut node, _) = Node::standard(noise_config(&sequential_psk()));
    let wire = node.connect();
    node.run();
    node.step(9_000);
    assert_eq!(wire.borrow().close_calls, 0);
    node.step(1_001);
    assert_eq!(wire.borrow().close_calls, 1);
}

#[test]
fn rotated_key_takes_over_after_disconnect() {
    let old = sequential_psk();
    let new = [0x5A; 32];
    let (mut node, _) = Node::standard(noise_config(&old));
    let mut client = NoiseClient::begin(node.connect(), &old);
    node.run();
    client.finish().unwrap();
    client.send(&ConnectRequest::default());
    node.run();
    client.recv();

    client.send(&NoiseEncryptionSetKeyRequest {
        key: base64::engine::general_purpose::STANDARD.encode(new),
    });
    node.run();
    let frames = client.recv();
    assert_eq!(types(&frames), [NoiseEncryptionSetKeyResponse::MESSAGE_TYPE]);
    assert!(NoiseEncryptionSetKeyResponse::decode(&frames[0].1).unwrap().success);

    // still under the old key until activation
    node.step(150);
    let frames = client.recv();
    assert_eq!(types(&frames), [DisconnectRequest::MESSAGE_TYPE]);
    assert!(node.events().contains(&ApiEvent::PskActivated));

    client.send(&DisconnectResponse::default());
    node.run();
    assert_eq!(client.wire.borrow().close_calls, 1);

    let mut fresh = NoiseClient::begin(node.connect(), &new);
    node.run();
    assert!(fresh.finish().is_ok());
}

#[test]
fn malformed_key_is_refused() {
    let psk = sequential_psk();
    let (mut node, _) = Node::standard(noise_config(&psk));
    let mut client = NoiseClient::begin(node.connect(), &psk);
    node.run();
    client.finish().unwrap();
    client.send(&ConnectRequest::default());
    node.run();
    client.recv();

    client.send(&NoiseEncryptionSetKeyRequest {
        key: base64::engine::general_purpose::STANDARD.encode([1u8; 16]),
    });
    node.run();
    let frames = client.recv();
    assert!(!NoiseEncryptionSetKeyResponse::decode(&frames[0].1).unwrap().success);
    node.step(150);
    assert!(client.recv().is_empty());
}
