//! Native API demo node.
//!
//! Serves a handful of in-memory entities over the Native API on TCP.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Adapters (outer ring)                   │
//! │  TcpListenerAdapter  SystemClock  SystemRandom           │
//! │  NvsAdapter          ApiLogForwarder  LogEventSink       │
//! │  ──────────────── Port Trait Boundary ────────────────   │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │  Application: Context (scheduler, entities)        │  │
//! │  │    ├─ ApiServer  (connections, batching, Noise)    │  │
//! │  │    └─ DemoNode   (publishes sensor readings)       │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `native-api-node [config.json]`

#![deny(unused_must_use)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use log::info;

use native_api::adapters::log_sink::{ApiLogForwarder, LogEventSink};
use native_api::adapters::nvs::NvsAdapter;
use native_api::adapters::random::SystemRandom;
use native_api::adapters::tcp::TcpListenerAdapter;
use native_api::adapters::time::SystemClock;
use native_api::app::events::ApiEvent;
use native_api::app::ports::EventSink;
use native_api::app::{Application, Component, Context};
use native_api::config::ApiConfig;
use native_api::entity::{
    Entity, EntityCategory, EntityCommand, EntityData, EntityInfo, StateClass, UpdateInfo,
};
use native_api::scheduler::ComponentId;
use native_api::server::ApiServer;

/// Upper bound on one loop sleep.
const LOOP_INTERVAL_MS: u32 = 16;

const SERVER_ID: ComponentId = ComponentId(1);
const DEMO_ID: ComponentId = ComponentId(2);

// ── Demo entities ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct DemoKeys {
    temperature: u32,
    motion: u32,
    status: u32,
    ring: u32,
    doorbell: u32,
    firmware: u32,
}

/// Publishes a slowly drifting temperature and an uptime string.
struct DemoNode {
    keys: DemoKeys,
    publish_due: Arc<AtomicBool>,
    reading: f32,
    ticks: u32,
}

impl DemoNode {
    fn register(ctx: &mut Context) -> Self {
        let mut keys = DemoKeys::default();
        let mut add = |entity: Entity| ctx.add_entity(entity).unwrap_or_default();

        keys.temperature = add(Entity::new(
            EntityInfo::new("temperature", "Temperature").with_device_class("temperature"),
            EntityData::Sensor {
                state: None,
                unit: "°C".into(),
                accuracy_decimals: 1,
                force_update: false,
                state_class: StateClass::Measurement,
            },
        ));
        keys.motion = add(Entity::new(
            EntityInfo::new("motion", "Motion").with_device_class("motion"),
            EntityData::BinarySensor {
                state: None,
                is_status: false,
            },
        ));
        add(Entity::new(
            EntityInfo::new("relay", "Relay").with_icon("mdi:power"),
            EntityData::Switch {
                state: false,
                assumed_state: false,
            },
        ));
        keys.status = add(Entity::new(
            EntityInfo::new("uptime", "Uptime").with_category(EntityCategory::Diagnostic),
            EntityData::TextSensor { state: None },
        ));
        keys.ring = add(Entity::new(
            EntityInfo::new("ring", "Ring").with_device_class("identify"),
            EntityData::Button,
        ));
        keys.doorbell = add(Entity::new(
            EntityInfo::new("doorbell", "Doorbell").with_device_class("doorbell"),
            EntityData::Event {
                event_types: vec!["ring".into()],
            },
        ));
        keys.firmware = add(Entity::new(
            EntityInfo::new("firmware", "Firmware").with_category(EntityCategory::Config),
            EntityData::Update {
                info: UpdateInfo::default(),
                has_state: false,
            },
        ));

        Self {
            keys,
            publish_due: Arc::new(AtomicBool::new(true)),
            reading: 21.0,
            ticks: 0,
        }
    }
}

impl Component for DemoNode {
    fn id(&self) -> ComponentId {
        DEMO_ID
    }

    fn name(&self) -> &'static str {
        "demo"
    }

    fn setup(&mut self, ctx: &mut Context) {
        let due = self.publish_due.clone();
        ctx.scheduler.set_interval(DEMO_ID, "publish", 5_000, move |_| {
            due.store(true, Ordering::Release);
        });
        ctx.publish_update(
            self.keys.firmware,
            UpdateInfo {
                current_version: env!("CARGO_PKG_VERSION").into(),
                latest_version: env!("CARGO_PKG_VERSION").into(),
                title: "native-api-node".into(),
                ..UpdateInfo::default()
            },
        );
    }

    fn tick(&mut self, ctx: &mut Context) {
        if !self.publish_due.swap(false, Ordering::AcqRel) {
            return;
        }
        self.ticks += 1;
        self.reading += if self.ticks % 4 < 2 { 0.1 } else { -0.1 };
        ctx.publish_sensor(self.keys.temperature, self.reading);
        ctx.publish_binary_sensor(self.keys.motion, self.ticks % 6 == 0);
        ctx.publish_text_sensor(self.keys.status, format!("{} s", ctx.now() / 1000));
    }

    fn dump_config(&self) {
        info!("Demo node: 7 entities, publishing every 5 s");
    }
}

// ── Entry point ───────────────────────────────────────────────

fn load_config(path: Option<String>) -> Result<ApiConfig> {
    let Some(path) = path else {
        info!("No config file given, using defaults");
        return Ok(ApiConfig::default());
    };
    let text = std::fs::read_to_string(&path)?;
    let config: ApiConfig =
        serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("{}: {}", path, e))?;
    info!("Config loaded from {}", path);
    Ok(config)
}

fn main() -> Result<()> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    ApiLogForwarder::new(logger).init()?;

    info!("native-api-node v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(std::env::args().nth(1))?;
    config.validate()?;

    let mut ctx = Context::new(Arc::new(SystemClock::new()), Arc::new(SystemRandom::new()));
    let demo = DemoNode::register(&mut ctx);
    let keys = demo.keys;

    let listener = TcpListenerAdapter::bind(config.port)?;
    let server = ApiServer::new(SERVER_ID, config, Box::new(listener), Box::new(NvsAdapter::new()));

    let mut app = Application::new(ctx);
    app.register(Box::new(server));
    app.register(Box::new(demo));
    app.setup();

    info!("System ready. Entering event loop.");
    let mut sink = LogEventSink::new();
    loop {
        app.run_once();

        let events = app.context_mut().take_events();
        for event in events {
            if let ApiEvent::Command(EntityCommand::Button { key }) = &event {
                if *key == keys.ring {
                    app.context_mut().trigger_event(keys.doorbell, "ring");
                }
            }
            sink.emit(event);
        }

        let wait = app
            .next_wake_in()
            .map_or(LOOP_INTERVAL_MS, |ms| ms.min(LOOP_INTERVAL_MS))
            .max(1);
        std::thread::sleep(Duration::from_millis(u64::from(wait)));
    }
}
