//! Logs heartbeat ticks

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ava_plugin_api::{
    BusEvent, ConfigOption, Plugin, PluginConstruct, PluginContext, PluginDescriptor, PluginError,
    PluginInit, SettingType,
};

use crate::HEARTBEAT_TICK;

const DEFAULT_LOG_EVERY: i64 = 10;

pub struct TickLogger {
    log_every: u64,
    seen: Arc<AtomicU64>,
}

impl TickLogger {
    pub fn log_every(&self) -> u64 {
        self.log_every
    }

    /// Ticks received since construction
    pub fn ticks_seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }
}

impl PluginConstruct for TickLogger {
    fn construct(init: PluginInit) -> Self {
        let log_every = init
            .setting::<i64>("log_every")
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_LOG_EVERY);
        Self {
            log_every: log_every as u64,
            seen: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl Plugin for TickLogger {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new("tick-logger", env!("CARGO_PKG_VERSION"))
            .with_description("Logs heartbeat ticks")
            .with_author("ava")
            .depends_on("heartbeat")
            .subscribes_to(HEARTBEAT_TICK)
            .with_option(
                "log_every",
                ConfigOption::new(SettingType::Int)
                    .with_default(DEFAULT_LOG_EVERY)
                    .with_description("Log one line per this many ticks"),
            )
    }

    async fn load(&mut self, _ctx: &mut PluginContext) -> Result<bool, PluginError> {
        Ok(true)
    }

    async fn start(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError> {
        let seen = self.seen.clone();
        let log_every = self.log_every;
        ctx.subscribe(HEARTBEAT_TICK, move |event: &BusEvent| {
            let received = seen.fetch_add(1, Ordering::Relaxed) + 1;
            if received % log_every == 0 {
                tracing::info!(
                    received,
                    count = %event.payload["count"],
                    "Heartbeat"
                );
            }
        })?;
        Ok(true)
    }

    async fn unload(&mut self, _ctx: &mut PluginContext) -> Result<bool, PluginError> {
        tracing::debug!(ticks = self.ticks_seen(), "Tick logger unloaded");
        Ok(true)
    }
}
