//! Host entropy adapter.
//!
//! Uses `RandomState` to produce non-cryptographic values for scheduler
//! jitter.  Noise ephemeral keys never come from here.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::app::ports::RandomSource;

#[derive(Debug, Default)]
pub struct SystemRandom {
    counter: AtomicU64,
}

impl SystemRandom {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RandomSource for SystemRandom {
    fn random_u32(&self) -> u32 {
        let mut h = RandomState::new().build_hasher();
        h.write_u64(self.counter.fetch_add(1, Ordering::Relaxed));
        h.finish() as u32
    }
}
