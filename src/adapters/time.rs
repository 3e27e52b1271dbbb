//! Host time adapter.
//!
//! - [`SystemClock`] implements the [`Clock`] port with
//!   `std::time::Instant` (monotonic, millisecond precision, wrapping at
//!   `u32::MAX` like the hardware counter).
//! - Wall-clock time is unknown until a client answers `GetTimeRequest`;
//!   after that it advances with the monotonic clock.
//! - [`platform_now`] feeds `burster` rate limiters.

use core::time::Duration;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::clock::Clock;

fn boot() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

/// Time since first use, for token-bucket time providers.
pub fn platform_now() -> Duration {
    boot().elapsed()
}

/// Monotonic clock with an optional synced wall-clock offset.
#[derive(Debug, Default)]
pub struct SystemClock {
    /// `epoch << 32 | millis at sync`; 0 = never synced.
    synced: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        // Pin the epoch before the first sample.
        boot();
        Self::default()
    }
}

impl Clock for SystemClock {
    fn millis(&self) -> u32 {
        // truncation is the 32-bit wrap
        boot().elapsed().as_millis() as u32
    }

    fn epoch_seconds(&self) -> Option<u32> {
        let synced = self.synced.load(Ordering::Acquire);
        if synced == 0 {
            return None;
        }
        let epoch = (synced >> 32) as u32;
        let at = synced as u32;
        let elapsed_s = self.millis().wrapping_sub(at) / 1000;
        Some(epoch.wrapping_add(elapsed_s))
    }

    fn set_epoch_seconds(&self, epoch: u32) {
        let packed = (u64::from(epoch) << 32) | u64::from(self.millis());
        self.synced.store(packed, Ordering::Release);
    }
}
