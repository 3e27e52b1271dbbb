//! Adapters — host implementations of the port traits.
//!
//! | Adapter    | Implements          | Connects to                  |
//! |------------|---------------------|------------------------------|
//! | `tcp`      | Socket, Listener    | std non-blocking TCP         |
//! | `time`     | Clock               | `std::time::Instant`         |
//! | `random`   | RandomSource        | `RandomState` hashing        |
//! | `nvs`      | StoragePort         | In-memory store (simulation) |
//! | `log_sink` | EventSink, log::Log | Console + API log channel    |

pub mod log_sink;
pub mod nvs;
pub mod random;
pub mod tcp;
pub mod time;
