//! Application core — explicit process context and the cooperative loop.
//!
//! There is no global application object.  One [`Context`] owns the
//! scheduler, the entity registry, the loop time and the outbound queues;
//! it is passed by `&mut` into every component on every iteration.
//!
//! ```text
//!  Application::run_once(now)
//!    ├─ ctx.scheduler.call(now)
//!    ├─ for component in active[..active_end]:  component.tick(ctx)
//!    │     └─ loop enable/disable requests applied in place
//!    └─ dump_config() on every component, if requested
//! ```
//!
//! Looping components live in one vector partitioned into an active
//! prefix and an idle suffix.  Disabling swaps the component with the
//! last active one; enabling swaps it with the first idle one.  The
//! partition is stable: a component is active iff it sits before
//! `active_end`, and nothing is ever skipped or run twice in one pass.

pub mod events;
pub mod ports;

use std::sync::Arc;

use log::{debug, info};

use crate::clock::Clock;
use crate::entity::{Entity, EntityCommand, EntityData, EntityRegistry, EntityUpdate, UpdateInfo};
use crate::scheduler::{ComponentId, Scheduler};
use events::ApiEvent;
use ports::{EventSink, RandomSource};

// ───────────────────────────────────────────────────────────────
// Context
// ───────────────────────────────────────────────────────────────

/// Explicit process state shared by all components.
pub struct Context {
    pub scheduler: Scheduler,
    pub entities: EntityRegistry,
    loop_time: u32,
    updates: Vec<EntityUpdate>,
    events: Vec<ApiEvent>,
    loop_requests: Vec<(ComponentId, bool)>,
    dump_config_requested: bool,
}

impl Context {
    pub fn new(clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>) -> Self {
        Self {
            scheduler: Scheduler::new(clock, random),
            entities: EntityRegistry::new(),
            loop_time: 0,
            updates: Vec::new(),
            events: Vec::new(),
            loop_requests: Vec::new(),
            dump_config_requested: false,
        }
    }

    /// Millisecond sample taken at the start of the current iteration.
    pub fn now(&self) -> u32 {
        self.loop_time
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.scheduler.clock()
    }

    /// Refresh the loop time from the clock.
    pub fn refresh_time(&mut self) -> u32 {
        self.loop_time = self.scheduler.clock().millis();
        self.loop_time
    }

    // ── Entity state publishing ──────────────────────────────

    pub fn add_entity(&mut self, entity: Entity) -> Option<u32> {
        self.entities.add(entity)
    }

    pub fn publish_binary_sensor(&mut self, key: u32, value: bool) {
        self.publish_with(key, |data| match data {
            EntityData::BinarySensor { state, .. } => {
                *state = Some(value);
                true
            }
            _ => false,
        });
    }

    /// Publishes even when the value is unchanged; sensors always report.
    pub fn publish_sensor(&mut self, key: u32, value: f32) {
        self.publish_with(key, |data| match data {
            EntityData::Sensor { state, .. } => {
                *state = Some(value);
                true
            }
            _ => false,
        });
    }

    pub fn publish_switch(&mut self, key: u32, value: bool) {
        self.publish_with(key, |data| match data {
            EntityData::Switch { state, .. } => {
                *state = value;
                true
            }
            _ => false,
        });
    }

    pub fn publish_text_sensor(&mut self, key: u32, value: impl Into<String>) {
        let value = value.into();
        self.publish_with(key, move |data| match data {
            EntityData::TextSensor { state } => {
                *state = Some(value);
                true
            }
            _ => false,
        });
    }

    pub fn publish_update(&mut self, key: u32, info: UpdateInfo) {
        self.publish_with(key, move |data| match data {
            EntityData::Update {
                info: current,
                has_state,
            } => {
                *current = info;
                *has_state = true;
                true
            }
            _ => false,
        });
    }

    /// Fire an event entity.  Unknown event types are dropped.
    pub fn trigger_event(&mut self, key: u32, event_type: impl Into<String>) {
        let event_type = event_type.into();
        let known = matches!(
            self.entities.get(key).map(|e| &e.data),
            Some(EntityData::Event { event_types }) if event_types.iter().any(|t| *t == event_type)
        );
        if !known {
            debug!("Event {:?} not declared for {:#010x}", event_type, key);
            return;
        }
        self.updates.push(EntityUpdate::Event { key, event_type });
    }

    fn publish_with(&mut self, key: u32, apply: impl FnOnce(&mut EntityData) -> bool) {
        let Some(entity) = self.entities.get_mut(key) else {
            debug!("Publish for unknown entity {:#010x}", key);
            return;
        };
        if apply(&mut entity.data) {
            self.updates.push(EntityUpdate::State(key));
        }
    }

    /// Apply a client command locally and raise it as an event.
    pub fn handle_command(&mut self, cmd: EntityCommand) {
        if self.entities.apply_command(&cmd) {
            self.updates.push(EntityUpdate::State(cmd.key()));
        }
        self.emit(ApiEvent::Command(cmd));
    }

    /// Pending fan-out work, in publish order.
    pub fn take_updates(&mut self) -> Vec<EntityUpdate> {
        core::mem::take(&mut self.updates)
    }

    pub fn take_events(&mut self) -> Vec<ApiEvent> {
        core::mem::take(&mut self.events)
    }

    // ── Loop control ─────────────────────────────────────────

    pub fn disable_loop(&mut self, id: ComponentId) {
        self.loop_requests.push((id, false));
    }

    pub fn enable_loop(&mut self, id: ComponentId) {
        self.loop_requests.push((id, true));
    }

    pub fn request_dump_config(&mut self) {
        self.dump_config_requested = true;
    }
}

impl EventSink for Context {
    fn emit(&mut self, event: ApiEvent) {
        if event == ApiEvent::DumpConfig {
            self.dump_config_requested = true;
        }
        self.events.push(event);
    }
}

// ───────────────────────────────────────────────────────────────
// Components
// ───────────────────────────────────────────────────────────────

/// A unit of work driven by the application loop.
pub trait Component {
    fn id(&self) -> ComponentId;

    fn name(&self) -> &'static str;

    fn setup(&mut self, _ctx: &mut Context) {}

    /// One cooperative iteration.  Must not block.
    fn tick(&mut self, ctx: &mut Context);

    fn dump_config(&self) {}
}

/// Owns the context and the looping components.
pub struct Application {
    ctx: Context,
    components: Vec<Box<dyn Component>>,
    active_end: usize,
}

impl Application {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            components: Vec::new(),
            active_end: 0,
        }
    }

    /// Register a component.  It starts in the active partition.
    pub fn register(&mut self, component: Box<dyn Component>) {
        self.components.push(component);
        let last = self.components.len() - 1;
        self.components.swap(self.active_end, last);
        self.active_end += 1;
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn active_count(&self) -> usize {
        self.active_end
    }

    pub fn is_active(&self, id: ComponentId) -> bool {
        self.components[..self.active_end].iter().any(|c| c.id() == id)
    }

    pub fn setup(&mut self) {
        for c in &mut self.components {
            debug!("Setting up {}", c.name());
            c.setup(&mut self.ctx);
        }
        self.apply_loop_requests(&mut 0);
        self.dump_config();
    }

    /// One loop iteration.
    pub fn run_once(&mut self) {
        let now = self.ctx.refresh_time();
        self.ctx.scheduler.call(now);
        let mut ran = 0;
        self.apply_loop_requests(&mut ran);

        while ran < self.active_end {
            self.components[ran].tick(&mut self.ctx);
            ran += 1;
            self.apply_loop_requests(&mut ran);
        }

        if self.ctx.dump_config_requested {
            self.ctx.dump_config_requested = false;
            self.dump_config();
        }
    }

    /// Milliseconds until the scheduler next has work, if any.
    pub fn next_wake_in(&self) -> Option<u32> {
        self.ctx.scheduler.next_schedule_in(self.ctx.scheduler.clock().millis())
    }

    fn dump_config(&self) {
        info!("Components: {} ({} looping)", self.components.len(), self.active_end);
        for c in &self.components {
            c.dump_config();
        }
    }

    /// Apply queued enable/disable requests.  `ran` is the length of the
    /// prefix that already ticked this pass; it shrinks when a component
    /// inside it goes idle so the unrun suffix stays contiguous.
    fn apply_loop_requests(&mut self, ran: &mut usize) {
        for (id, enable) in core::mem::take(&mut self.ctx.loop_requests) {
            let Some(pos) = self.components.iter().position(|c| c.id() == id) else {
                continue;
            };
            if enable && pos >= self.active_end {
                self.components.swap(pos, self.active_end);
                self.active_end += 1;
            } else if !enable && pos < self.active_end {
                if pos < *ran {
                    // Move it to the end of the ran prefix, then trade
                    // places with the last unrun component.
                    *ran -= 1;
                    self.components.swap(pos, *ran);
                    self.active_end -= 1;
                    self.components.swap(*ran, self.active_end);
                } else {
                    self.active_end -= 1;
                    self.components.swap(pos, self.active_end);
                }
            }
        }
    }
}
