//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that drives a full node (application
//! loop, API server, frame helpers) against in-memory sockets.  A
//! scripted controller plays the client side, including the Noise
//! initiator.  All tests run on the host with no real network.

mod batch_tests;
mod keepalive_tests;
mod mock_net;
mod noise_flow_tests;
mod plaintext_flow_tests;
mod scheduler_tests;
