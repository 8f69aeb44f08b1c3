//! Periodic tick emitter

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use ava_plugin_api::{
    ConfigOption, Plugin, PluginConstruct, PluginContext, PluginDescriptor, PluginError,
    PluginInit, SettingType,
};

use crate::HEARTBEAT_TICK;

const DEFAULT_INTERVAL_MS: i64 = 1000;

pub struct Heartbeat {
    interval: Duration,
    /// Ticks emitted by this instance, kept across stop/start
    ticks: Arc<AtomicU64>,
}

impl Heartbeat {
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl PluginConstruct for Heartbeat {
    fn construct(init: PluginInit) -> Self {
        let millis = init
            .setting::<i64>("interval_ms")
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_INTERVAL_MS);
        Self {
            interval: Duration::from_millis(millis as u64),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl Plugin for Heartbeat {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new("heartbeat", env!("CARGO_PKG_VERSION"))
            .with_description("Emits a periodic heartbeat event")
            .with_author("ava")
            .emits(HEARTBEAT_TICK)
            .with_option(
                "interval_ms",
                ConfigOption::new(SettingType::Int)
                    .with_default(DEFAULT_INTERVAL_MS)
                    .with_description("Milliseconds between ticks"),
            )
    }

    async fn load(&mut self, _ctx: &mut PluginContext) -> Result<bool, PluginError> {
        tracing::debug!(interval = ?self.interval, "Heartbeat loaded");
        Ok(true)
    }

    async fn start(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError> {
        let bus = ctx
            .event_bus()
            .ok_or_else(|| PluginError::NoEventBus(ctx.plugin_name().to_string()))?;
        let period = self.interval;
        let ticks = self.ticks.clone();

        ctx.spawn_task(move |token| async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let count = ticks.fetch_add(1, Ordering::Relaxed) + 1;
                        bus.emit(HEARTBEAT_TICK, serde_json::json!({ "count": count }));
                    }
                }
            }
            tracing::debug!("Heartbeat ticker stopped");
        });
        Ok(true)
    }

    async fn unload(&mut self, _ctx: &mut PluginContext) -> Result<bool, PluginError> {
        tracing::debug!(ticks = self.ticks(), "Heartbeat unloaded");
        Ok(true)
    }
}
