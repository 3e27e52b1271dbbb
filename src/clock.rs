//! Millisecond time sources and the 64-bit rollover composer.
//!
//! ```text
//!   Clock::millis()  ──►  u32 sample (wraps every ~49.7 days)
//!                            │
//!                            ▼
//!   Millis64::extend(now) ──► (major:u16 << 32) | low:u32   (never decreases)
//! ```
//!
//! Any 32-bit millisecond delta compared outside this module goes through
//! [`time_after`] or `wrapping_sub`; raw 32-bit deadlines never cross a
//! module boundary.

use core::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use log::info;

/// Half the 32-bit range.  A backwards step larger than this is a rollover.
const HALF_MAX_U32: u32 = u32::MAX / 2;

/// Samples within this distance of `u32::MAX` or `0` always take the lock.
const ROLLOVER_WINDOW_MS: u32 = 10_000;

/// `true` when `a` is strictly later than `b` on a wrapping 32-bit clock.
#[inline]
pub fn time_after(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Platform clock.  Every call returns a fresh sample.
pub trait Clock: Send + Sync {
    /// Monotonic milliseconds since boot, wrapping at `u32::MAX`.
    fn millis(&self) -> u32;

    /// Wall-clock UNIX seconds, if known.
    fn epoch_seconds(&self) -> Option<u32> {
        None
    }

    /// Install wall-clock time learned from a peer.
    fn set_epoch_seconds(&self, _epoch: u32) {}
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU32,
    /// 0 = unknown.
    epoch: AtomicU32,
}

impl ManualClock {
    pub fn new(start: u32) -> Self {
        Self {
            millis: AtomicU32::new(start),
            epoch: AtomicU32::new(0),
        }
    }

    pub fn set(&self, millis: u32) {
        self.millis.store(millis, Ordering::Release);
    }

    pub fn advance(&self, delta_ms: u32) {
        // fetch_add wraps on overflow, like the hardware counter
        self.millis.fetch_add(delta_ms, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn millis(&self) -> u32 {
        self.millis.load(Ordering::Acquire)
    }

    fn epoch_seconds(&self) -> Option<u32> {
        match self.epoch.load(Ordering::Acquire) {
            0 => None,
            e => Some(e),
        }
    }

    fn set_epoch_seconds(&self, epoch: u32) {
        self.epoch.store(epoch, Ordering::Release);
    }
}

// ───────────────────────────────────────────────────────────────
// 64-bit composer
// ───────────────────────────────────────────────────────────────

/// Extends 32-bit samples into a monotonic 64-bit millisecond count.
///
/// Readers take an acquire load of the major epoch, then of the last
/// sample, and re-read the major before returning; a mismatch means a
/// rollover was published concurrently and the read is retried.  The
/// major epoch is only ever written under the critical section.
#[derive(Debug, Default)]
pub struct Millis64 {
    last: AtomicU32,
    major: AtomicU16,
}

impl Millis64 {
    pub const fn new() -> Self {
        Self {
            last: AtomicU32::new(0),
            major: AtomicU16::new(0),
        }
    }

    /// Current major epoch (upper 16 bits of the composed time).
    pub fn major(&self) -> u16 {
        self.major.load(Ordering::Acquire)
    }

    /// Compose a 64-bit time from a freshly sampled `now`.
    ///
    /// Stale samples are not retried: the caller must pass a value read
    /// from the clock immediately before the call.
    pub fn extend(&self, now: u32) -> u64 {
        loop {
            let major = self.major.load(Ordering::Acquire);
            let mut last = self.last.load(Ordering::Acquire);

            let rolled = now < last && (last - now) > HALF_MAX_U32;
            if rolled || near_rollover(now) || near_rollover(last) {
                return self.extend_locked(now);
            }

            // Publish forward progress without the lock.
            while now > last && (now - last) < HALF_MAX_U32 {
                match self.last.compare_exchange_weak(
                    last,
                    now,
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(current) => last = current,
                }
            }

            if self.major.load(Ordering::Acquire) == major {
                return compose(major, now);
            }
        }
    }

    fn extend_locked(&self, now: u32) -> u64 {
        critical_section::with(|_| {
            let last = self.last.load(Ordering::Relaxed);
            let mut major = self.major.load(Ordering::Relaxed);

            if now < last && (last - now) > HALF_MAX_U32 {
                major = major.wrapping_add(1);
                self.major.store(major, Ordering::Release);
                self.last.store(now, Ordering::Release);
                info!(
                    "Detected true 32-bit rollover (now={}, last={}, major={})",
                    now, last, major
                );
            } else if now > last {
                self.last.store(now, Ordering::Release);
            }

            compose(major, now)
        })
    }
}

#[inline]
fn near_rollover(sample: u32) -> bool {
    sample > u32::MAX - ROLLOVER_WINDOW_MS || sample < ROLLOVER_WINDOW_MS
}

#[inline]
fn compose(major: u16, low: u32) -> u64 {
    ((major as u64) << 32) | low as u64
}
