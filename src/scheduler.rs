//! Cooperative timer scheduler.
//!
//! A min-heap of timer items keyed on a 64-bit absolute deadline, a
//! `to_add` staging list, and a FIFO defer queue.  Everything runs on the
//! loop task via [`Scheduler::call`]; other threads may only enqueue.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  set_timeout / set_interval / set_retry   (any thread)       │
//! │        │                          │                          │
//! │   delay == 0                 delay > 0                       │
//! │        ▼                          ▼                          │
//! │  ┌────────────┐            ┌────────────┐                    │
//! │  │ defer FIFO │            │  to_add    │                    │
//! │  └─────┬──────┘            └─────┬──────┘                    │
//! │        │                         │ process_to_add()          │
//! │        │                         ▼                           │
//! │        │                  ┌─────────────┐                    │
//! │        │                  │ heap (min   │                    │
//! │        │                  │ deadline)   │                    │
//! │        │                  └─────┬───────┘                    │
//! │        ▼                        ▼                            │
//! │             call(now)   (loop task, lock released)           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cancellation is mark-and-sweep: a cancelled item keeps its slot with
//! `removed = true` and is never invoked.  Removed heap entries are
//! swept when they reach the top, or all at once when more than
//! [`MAX_LOGICALLY_DELETED_ITEMS`] accumulate.
//!
//! One lock guards the heap, `to_add`, the defer queue and the removal
//! counter.  Callbacks always run with the lock released, so they may
//! call any scheduler API, including cancelling themselves.

use core::cell::{Cell, RefCell};
use core::cmp::Ordering;
use std::borrow::Cow;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{error, trace};

use crate::app::ports::RandomSource;
use crate::clock::{Clock, Millis64};

/// Delay sentinel: cancel any same-name item and schedule nothing.
pub const SCHEDULER_DONT_RUN: u32 = u32::MAX;

/// Removed heap entries tolerated before a full rebuild.
pub const MAX_LOGICALLY_DELETED_ITEMS: u32 = 10;

/// Upper bound for the random first-fire offset of an interval.
const MAX_INTERVAL_DELAY_MS: u32 = 5_000;

pub type TimerCallback = Box<dyn FnMut(&Scheduler) + Send>;
pub type RetryFn = Box<dyn FnMut(u8) -> RetryResult + Send>;

// ═══════════════════════════════════════════════════════════════
//  Identity
// ═══════════════════════════════════════════════════════════════

/// Opaque handle of the component that owns a scheduler item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(pub u32);

/// Optional item name, either a static literal or an owned copy.
///
/// Unnamed items run normally but can never be cancelled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskName(Option<Cow<'static, str>>);

impl TaskName {
    pub const NONE: Self = Self(None);

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }
}

impl From<&'static str> for TaskName {
    fn from(s: &'static str) -> Self {
        Self(Some(Cow::Borrowed(s)))
    }
}

impl From<String> for TaskName {
    fn from(s: String) -> Self {
        Self(Some(Cow::Owned(s)))
    }
}

/// Returned by a retry function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryResult {
    Done,
    Retry,
}

// ═══════════════════════════════════════════════════════════════
//  Items
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Timeout,
    Interval,
}

struct SchedulerItem {
    owner: ComponentId,
    name: TaskName,
    kind: ItemKind,
    /// Period for intervals, 0 for one-shots.
    interval: u32,
    next_execution: u64,
    callback: Option<TimerCallback>,
    removed: Cell<bool>,
    is_retry: bool,
}

impl SchedulerItem {
    fn matches(&self, owner: ComponentId, name: &str, kind: ItemKind, match_retry: bool) -> bool {
        if self.owner != owner || self.kind != kind || (match_retry && !self.is_retry) {
            return false;
        }
        self.name.as_str() == Some(name)
    }

    fn is_live_match(&self, owner: ComponentId, name: &str, kind: ItemKind, match_retry: bool) -> bool {
        !self.removed.get() && self.matches(owner, name, kind, match_retry)
    }
}

// BinaryHeap is a max-heap; invert so the earliest deadline is on top.
impl Ord for SchedulerItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other.next_execution.cmp(&self.next_execution)
    }
}

impl PartialOrd for SchedulerItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SchedulerItem {
    fn eq(&self, other: &Self) -> bool {
        self.next_execution == other.next_execution
    }
}

impl Eq for SchedulerItem {}

struct RetryArgs {
    func: RetryFn,
    countdown: u8,
    current_interval: u32,
    owner: ComponentId,
    name: TaskName,
    backoff_factor: f32,
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct State {
    heap: BinaryHeap<Box<SchedulerItem>>,
    to_add: Vec<Box<SchedulerItem>>,
    defer: VecDeque<Box<SchedulerItem>>,
    /// Removed entries still sitting in `heap`.
    to_remove: u32,
    /// Heap item whose callback is running right now.
    executing: Option<Box<SchedulerItem>>,
    failed: Vec<ComponentId>,
}

impl State {
    fn is_failed(&self, owner: ComponentId) -> bool {
        self.failed.contains(&owner)
    }

    fn cancel_locked(
        &mut self,
        owner: ComponentId,
        name: &TaskName,
        kind: ItemKind,
        match_retry: bool,
    ) -> bool {
        let Some(name) = name.as_str() else {
            return false;
        };
        let mut cancelled = 0usize;
        // Intervals never go through the defer queue.
        if kind == ItemKind::Timeout {
            for item in &self.defer {
                if item.is_live_match(owner, name, kind, match_retry) {
                    item.removed.set(true);
                    cancelled += 1;
                }
            }
        }
        if let Some(item) = &self.executing {
            if item.is_live_match(owner, name, kind, match_retry) {
                item.removed.set(true);
                cancelled += 1;
            }
        }
        for item in &self.heap {
            if item.is_live_match(owner, name, kind, match_retry) {
                item.removed.set(true);
                self.to_remove += 1;
                cancelled += 1;
            }
        }
        for item in &self.to_add {
            if item.is_live_match(owner, name, kind, match_retry) {
                item.removed.set(true);
                cancelled += 1;
            }
        }
        cancelled > 0
    }

    fn has_cancelled_retry(&self, owner: ComponentId, name: &str) -> bool {
        self.heap
            .iter()
            .chain(self.to_add.iter())
            .any(|item| item.removed.get() && item.matches(owner, name, ItemKind::Timeout, true))
    }

    fn process_to_add(&mut self) {
        for item in self.to_add.drain(..) {
            if !item.removed.get() {
                self.heap.push(item);
            }
        }
    }

    /// Pop removed entries off the top.  Returns the live heap size bound.
    fn cleanup(&mut self) -> usize {
        if self.to_remove == 0 {
            return self.heap.len();
        }
        while self.heap.peek().is_some_and(|top| top.removed.get()) {
            self.heap.pop();
            self.to_remove = self.to_remove.saturating_sub(1);
        }
        self.heap.len()
    }
}

enum Next {
    Idle,
    Skip,
    Run(TimerCallback),
}

/// Single-task cooperative scheduler with a thread-safe enqueue side.
pub struct Scheduler {
    state: Mutex<CriticalSectionRawMutex, RefCell<State>>,
    time: Millis64,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>) -> Self {
        Self {
            state: Mutex::new(RefCell::new(State::default())),
            time: Millis64::new(),
            clock,
            random,
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Compose a 64-bit monotonic time from a fresh 32-bit sample.
    pub fn millis_64(&self, now: u32) -> u64 {
        self.time.extend(now)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ── Enqueue ──────────────────────────────────────────────

    /// One-shot after `delay_ms`.  A delay of 0 takes the FIFO defer path.
    pub fn set_timeout(
        &self,
        owner: ComponentId,
        name: impl Into<TaskName>,
        delay_ms: u32,
        callback: impl FnMut(&Scheduler) + Send + 'static,
    ) {
        self.set_timer_common(
            owner,
            ItemKind::Timeout,
            name.into(),
            delay_ms,
            Box::new(callback),
            false,
        );
    }

    /// Repeating task.  The first run is offset by a random
    /// `0..min(period/2, 5 s)` to spread out components started together.
    pub fn set_interval(
        &self,
        owner: ComponentId,
        name: impl Into<TaskName>,
        period_ms: u32,
        callback: impl FnMut(&Scheduler) + Send + 'static,
    ) {
        self.set_timer_common(
            owner,
            ItemKind::Interval,
            name.into(),
            period_ms,
            Box::new(callback),
            false,
        );
    }

    /// Run on the next `call`, after every defer enqueued before it.
    pub fn defer(
        &self,
        owner: ComponentId,
        name: impl Into<TaskName>,
        callback: impl FnMut(&Scheduler) + Send + 'static,
    ) {
        self.set_timeout(owner, name, 0, callback);
    }

    /// Run `func` now; while it returns [`RetryResult::Retry`], run it
    /// again after `initial_wait_ms`, growing the wait by `backoff_factor`
    /// each time, for at most `max_attempts` runs.  `func` receives the
    /// number of attempts left.
    pub fn set_retry(
        &self,
        owner: ComponentId,
        name: impl Into<TaskName>,
        initial_wait_ms: u32,
        max_attempts: u8,
        func: impl FnMut(u8) -> RetryResult + Send + 'static,
        backoff_factor: f32,
    ) {
        let name = name.into();
        if name.is_some() {
            self.cancel_retry(owner, name.clone());
        }
        if initial_wait_ms == SCHEDULER_DONT_RUN {
            return;
        }

        let mut backoff_factor = backoff_factor;
        if backoff_factor < 0.0001 {
            error!(
                "Scheduler: backoff_factor {:.1} too small, using 1.0: {}",
                backoff_factor,
                name.as_str().unwrap_or("")
            );
            backoff_factor = 1.0;
        }

        let args = RetryArgs {
            func: Box::new(func),
            countdown: max_attempts,
            current_interval: initial_wait_ms,
            owner,
            name: name.clone(),
            backoff_factor,
        };
        self.set_timer_common(owner, ItemKind::Timeout, name, 0, retry_callback(args), true);
    }

    fn set_timer_common(
        &self,
        owner: ComponentId,
        kind: ItemKind,
        name: TaskName,
        delay_ms: u32,
        callback: TimerCallback,
        is_retry: bool,
    ) {
        if delay_ms == SCHEDULER_DONT_RUN {
            self.with_state(|s| s.cancel_locked(owner, &name, kind, false));
            return;
        }

        let mut item = Box::new(SchedulerItem {
            owner,
            name,
            kind,
            interval: 0,
            next_execution: 0,
            callback: Some(callback),
            removed: Cell::new(false),
            is_retry,
        });

        if delay_ms == 0 && kind == ItemKind::Timeout {
            self.with_state(|s| {
                s.cancel_locked(owner, &item.name, kind, false);
                s.defer.push_back(item);
            });
            return;
        }

        let now = self.millis_64(self.clock.millis());
        match kind {
            ItemKind::Interval => {
                item.interval = delay_ms;
                let span = (delay_ms / 2).min(MAX_INTERVAL_DELAY_MS);
                let offset = (span as f32 * self.random.random_float()) as u32;
                item.next_execution = now + offset as u64;
                trace!(
                    "Scheduler: interval {:?} every {}ms, offset {}ms",
                    item.name.as_str(),
                    delay_ms,
                    offset
                );
            }
            ItemKind::Timeout => {
                item.next_execution = now + delay_ms as u64;
            }
        }

        self.with_state(|s| {
            if let Some(n) = item.name.as_str() {
                if is_retry && s.has_cancelled_retry(owner, n) {
                    trace!("Scheduler: skipping retry '{}', found cancelled item", n);
                    return;
                }
            }
            s.cancel_locked(owner, &item.name, kind, false);
            s.to_add.push(item);
        });
    }

    // ── Cancel ───────────────────────────────────────────────

    pub fn cancel_timeout(&self, owner: ComponentId, name: impl Into<TaskName>) -> bool {
        let name = name.into();
        self.with_state(|s| s.cancel_locked(owner, &name, ItemKind::Timeout, false))
    }

    pub fn cancel_interval(&self, owner: ComponentId, name: impl Into<TaskName>) -> bool {
        let name = name.into();
        self.with_state(|s| s.cancel_locked(owner, &name, ItemKind::Interval, false))
    }

    pub fn cancel_retry(&self, owner: ComponentId, name: impl Into<TaskName>) -> bool {
        let name = name.into();
        self.with_state(|s| s.cancel_locked(owner, &name, ItemKind::Timeout, true))
    }

    /// Items owned by a failed component are dropped without running.
    pub fn mark_failed(&self, owner: ComponentId) {
        self.with_state(|s| {
            if !s.is_failed(owner) {
                s.failed.push(owner);
            }
        });
    }

    // ── Loop side ────────────────────────────────────────────

    /// Milliseconds until the next heap item is due, `Some(0)` if overdue,
    /// `None` if nothing is scheduled.  Loop task only.
    pub fn next_schedule_in(&self, now: u32) -> Option<u32> {
        let deadline = self.with_state(|s| {
            s.cleanup();
            s.heap.peek().map(|top| top.next_execution)
        })?;
        let now_64 = self.millis_64(now);
        Some(deadline.saturating_sub(now_64).min(u32::MAX as u64) as u32)
    }

    /// Service the scheduler.  `now` must be a fresh clock sample.
    pub fn call(&self, now: u32) {
        self.drain_defer();

        let now_64 = self.millis_64(now);
        self.with_state(|s| {
            s.process_to_add();
            if s.to_remove > MAX_LOGICALLY_DELETED_ITEMS {
                s.heap.retain(|item| !item.removed.get());
                s.to_remove = 0;
            }
            s.cleanup();
        });

        loop {
            let next = self.with_state(|s| {
                let Some(top) = s.heap.peek() else {
                    return Next::Idle;
                };
                if top.next_execution > now_64 {
                    return Next::Idle;
                }
                let Some(mut item) = s.heap.pop() else {
                    return Next::Idle;
                };
                if item.removed.get() {
                    s.to_remove = s.to_remove.saturating_sub(1);
                    return Next::Skip;
                }
                if s.is_failed(item.owner) {
                    return Next::Skip;
                }
                match item.callback.take() {
                    Some(cb) => {
                        s.executing = Some(item);
                        Next::Run(cb)
                    }
                    None => Next::Skip,
                }
            });

            let mut callback = match next {
                Next::Idle => break,
                Next::Skip => continue,
                Next::Run(cb) => cb,
            };

            callback(self);

            self.with_state(|s| {
                let Some(mut item) = s.executing.take() else {
                    return;
                };
                // Cancelled from inside its own callback.
                if item.removed.get() {
                    return;
                }
                if item.kind == ItemKind::Interval {
                    item.callback = Some(callback);
                    item.next_execution = now_64 + item.interval as u64;
                    s.to_add.push(item);
                }
            });
        }

        self.with_state(State::process_to_add);
    }

    fn drain_defer(&self) {
        loop {
            let next = self.with_state(|s| {
                let Some(mut item) = s.defer.pop_front() else {
                    return Next::Idle;
                };
                if item.removed.get() || s.is_failed(item.owner) {
                    return Next::Skip;
                }
                item.callback.take().map_or(Next::Skip, Next::Run)
            });
            match next {
                Next::Idle => break,
                Next::Skip => continue,
                Next::Run(mut cb) => cb(self),
            }
        }
    }

    fn run_retry(&self, mut args: RetryArgs) {
        args.countdown = args.countdown.saturating_sub(1);
        let result = (args.func)(args.countdown);
        if result == RetryResult::Done || args.countdown == 0 {
            return;
        }
        let delay = args.current_interval;
        args.current_interval = (args.current_interval as f32 * args.backoff_factor) as u32;
        let (owner, name) = (args.owner, args.name.clone());
        self.set_timer_common(owner, ItemKind::Timeout, name, delay, retry_callback(args), true);
    }
}

fn retry_callback(args: RetryArgs) -> TimerCallback {
    let mut slot = Some(args);
    Box::new(move |scheduler: &Scheduler| {
        if let Some(args) = slot.take() {
            scheduler.run_retry(args);
        }
    })
}
