//! Fuzz target: protobuf field decoding
//!
//! Decodes arbitrary bytes as several inbound message types.  Whatever
//! decodes must re-encode to exactly `calculate_size` bytes.
//!
//! cargo fuzz run fuzz_proto_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use native_api::proto::messages::{
    ConnectRequest, HelloRequest, NoiseEncryptionSetKeyRequest, SubscribeLogsRequest,
    SwitchCommandRequest, UpdateCommandRequest,
};
use native_api::proto::{ProtoDecodable, ProtoMessage};

fn check<M: ProtoDecodable + ProtoMessage>(data: &[u8]) {
    if let Ok(msg) = M::decode(data) {
        assert_eq!(msg.encode_to_vec().len(), msg.encoded_size());
    }
}

fuzz_target!(|data: &[u8]| {
    check::<HelloRequest>(data);
    check::<ConnectRequest>(data);
    check::<SubscribeLogsRequest>(data);
    check::<SwitchCommandRequest>(data);
    check::<UpdateCommandRequest>(data);
    check::<NoiseEncryptionSetKeyRequest>(data);
});
