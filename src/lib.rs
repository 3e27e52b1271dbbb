//! Native API core: the device side of the ESPHome-style Native API.
//!
//! Exposes the protocol modules for integration testing and for hosts
//! that embed the server.  Platform specifics live behind the port
//! traits in [`app::ports`]; [`adapters`] holds the std implementations.
//!
//! ```text
//!  TCP ──▶ frame (plaintext | noise) ──▶ connection ──▶ app::Context
//!                                          │   ▲           (entities,
//!                                          ▼   │            scheduler)
//!                                        batch ◀── server fan-out
//! ```

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod clock;
pub mod config;
pub mod connection;
pub mod entity;
pub mod error;
pub mod frame;
pub mod proto;
pub mod scheduler;
pub mod server;
