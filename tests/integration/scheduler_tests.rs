//! Scheduler behavior across the 32-bit millisecond rollover and through
//! the application loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use native_api::app::ports::RandomSource;
use native_api::app::{Application, Component, Context};
use native_api::clock::{Clock, ManualClock};
use native_api::scheduler::{ComponentId, RetryResult, Scheduler, TaskName};

const OWNER: ComponentId = ComponentId(9);

struct HalfRandom;

impl RandomSource for HalfRandom {
    fn random_u32(&self) -> u32 {
        u32::MAX / 2
    }
}

fn scheduler_at(start: u32) -> (Arc<ManualClock>, Scheduler) {
    let clock = Arc::new(ManualClock::new(start));
    let sched = Scheduler::new(clock.clone(), Arc::new(HalfRandom));
    (clock, sched)
}

fn feed(clock: &ManualClock, sched: &Scheduler, sample: u32) {
    clock.set(sample);
    sched.call(sample);
}

#[test]
fn timeout_across_rollover_fires_on_time() {
    let (clock, sched) = scheduler_at(0xFFFF_F000);
    let fired_at = Arc::new(AtomicU32::new(0));

    feed(&clock, &sched, 0xFFFF_F000);
    feed(&clock, &sched, 0xFFFF_FFFF);
    let f = fired_at.clone();
    let c = clock.clone();
    sched.set_timeout(OWNER, "after_wrap", 32, move |_| {
        f.store(c.millis(), Ordering::SeqCst);
    });

    feed(&clock, &sched, 0x0000_0010);
    assert_eq!(fired_at.load(Ordering::SeqCst), 0, "fired early");
    assert_eq!(sched.millis_64(0x0000_0010) >> 32, 1, "major epoch bumped");

    feed(&clock, &sched, 0x0000_001E);
    assert_eq!(fired_at.load(Ordering::SeqCst), 0);
    feed(&clock, &sched, 0x0000_001F);
    assert_eq!(fired_at.load(Ordering::SeqCst), 0x1F);

    feed(&clock, &sched, 0x0000_1000);
    assert_eq!(fired_at.load(Ordering::SeqCst), 0x1F, "one-shot ran twice");
}

#[test]
fn interval_keeps_period_through_rollover() {
    let (clock, sched) = scheduler_at(0xFFFF_FF00);
    let runs = Arc::new(Mutex::new(Vec::new()));
    let r = runs.clone();
    let c = clock.clone();
    sched.set_interval(OWNER, "tick", 100, move |_| {
        r.lock().unwrap().push(c.millis());
    });

    let mut now = 0xFFFF_FF00u32;
    for _ in 0..40 {
        now = now.wrapping_add(10);
        feed(&clock, &sched, now);
    }
    let runs = runs.lock().unwrap();
    assert!(runs.len() >= 3);
    for pair in runs.windows(2) {
        assert_eq!(pair[1].wrapping_sub(pair[0]), 100);
    }
}

#[test]
fn defers_run_in_order_before_timers() {
    let (clock, sched) = scheduler_at(1_000);
    let order = Arc::new(Mutex::new(Vec::new()));
    for tag in ["a", "b", "c"] {
        let o = order.clone();
        sched.defer(OWNER, TaskName::NONE, move |_| o.lock().unwrap().push(tag));
    }
    let o = order.clone();
    sched.set_timeout(OWNER, "later", 5, move |_| o.lock().unwrap().push("timer"));

    feed(&clock, &sched, 1_000);
    assert_eq!(*order.lock().unwrap(), ["a", "b", "c"]);
    feed(&clock, &sched, 1_005);
    assert_eq!(*order.lock().unwrap(), ["a", "b", "c", "timer"]);
}

#[test]
fn cancelled_timeout_never_runs() {
    let (clock, sched) = scheduler_at(0);
    let hits = Arc::new(AtomicU32::new(0));
    let h = hits.clone();
    sched.set_timeout(OWNER, "doomed", 10, move |_| {
        h.fetch_add(1, Ordering::SeqCst);
    });
    assert!(sched.cancel_timeout(OWNER, "doomed"));
    assert!(!sched.cancel_timeout(OWNER, "doomed"));
    assert!(!sched.cancel_timeout(OWNER, "never_set"));
    feed(&clock, &sched, 100);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn retry_with_zero_backoff_uses_constant_wait() {
    let (clock, sched) = scheduler_at(0);
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let a = attempts.clone();
    let c = clock.clone();
    sched.set_retry(
        OWNER,
        "probe",
        20,
        4,
        move |_left| {
            a.lock().unwrap().push(c.millis());
            RetryResult::Retry
        },
        0.0,
    );
    for t in (0..=200).step_by(5) {
        feed(&clock, &sched, t);
    }
    assert_eq!(*attempts.lock().unwrap(), [0, 20, 40, 60]);
}

// ── Through the application loop ──────────────────────────────

struct Blinker {
    count: Arc<AtomicU32>,
}

impl Component for Blinker {
    fn id(&self) -> ComponentId {
        OWNER
    }

    fn name(&self) -> &'static str {
        "blinker"
    }

    fn setup(&mut self, ctx: &mut Context) {
        let count = self.count.clone();
        ctx.scheduler.set_interval(OWNER, "blink", 1_000, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
    }

    fn tick(&mut self, ctx: &mut Context) {
        ctx.disable_loop(OWNER);
    }
}

#[test]
fn application_drives_timers_for_idle_components() {
    let clock = Arc::new(ManualClock::new(0));
    let count = Arc::new(AtomicU32::new(0));
    let mut app = Application::new(Context::new(clock.clone(), Arc::new(HalfRandom)));
    app.register(Box::new(Blinker {
        count: count.clone(),
    }));
    app.setup();

    app.run_once();
    assert!(!app.is_active(OWNER));
    for _ in 0..100 {
        clock.advance(50);
        app.run_once();
    }
    // 5 s of loops after a sub-500 ms start offset
    assert!((4..=5).contains(&count.load(Ordering::SeqCst)));
    assert!(app.next_wake_in().is_some_and(|ms| ms <= 1_000));
}
