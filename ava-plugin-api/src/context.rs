//! PluginContext - a plugin's handle to the host
//!
//! The context owns everything the host must be able to reclaim when a
//! plugin stops or fails: event subscriptions and background tasks.
//! Plugins never spawn detached work; they go through [`PluginContext::spawn_task`]
//! so the host can cancel and, if needed, abort it.

use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusEvent, EventBus, EventSeq, SubscriptionId};
use crate::error::PluginError;
use crate::types::LifecycleState;

/// Outcome of [`PluginContext::shutdown_tasks`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskShutdown {
    /// Tasks that exited after cancellation
    pub finished: usize,
    /// Tasks still running after the grace period
    pub aborted: usize,
}

pub struct PluginContext {
    plugin_name: String,
    bus: Option<Arc<dyn EventBus>>,
    settings: toml::Table,
    subscriptions: Vec<SubscriptionId>,
    reported_state: Option<LifecycleState>,
    tasks: JoinSet<()>,
    cancel: CancellationToken,
}

impl PluginContext {
    pub fn new(
        plugin_name: impl Into<String>,
        bus: Option<Arc<dyn EventBus>>,
        settings: toml::Table,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            bus,
            settings,
            subscriptions: Vec::new(),
            reported_state: None,
            tasks: JoinSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Get the plugin's name
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    // ─── Settings ────────────────────────────────────────────────────

    /// Validated settings for this plugin
    pub fn settings(&self) -> &toml::Table {
        &self.settings
    }

    /// Read a setting as `T`.
    ///
    /// # Example
    /// ```ignore
    /// let interval: Option<u64> = ctx.setting("interval_ms");
    /// ```
    pub fn setting<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.settings
            .get(key)
            .cloned()
            .and_then(|value| value.try_into().ok())
    }

    /// Read a required setting, failing if it is absent or mistyped.
    pub fn require_setting<T: DeserializeOwned>(&self, key: &str) -> Result<T, PluginError> {
        let value = self
            .settings
            .get(key)
            .cloned()
            .ok_or_else(|| PluginError::InvalidSetting {
                key: key.to_string(),
                reason: "not set".to_string(),
            })?;
        value.try_into().map_err(|e: toml::de::Error| PluginError::InvalidSetting {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    // ─── Events ──────────────────────────────────────────────────────

    pub fn event_bus(&self) -> Option<Arc<dyn EventBus>> {
        self.bus.clone()
    }

    /// Subscribe to an event; the subscription is released when the plugin
    /// stops or is unloaded.
    pub fn subscribe<F>(&mut self, event: &str, handler: F) -> Result<SubscriptionId, PluginError>
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let bus = self
            .bus
            .as_ref()
            .ok_or_else(|| PluginError::NoEventBus(self.plugin_name.clone()))?;
        let id = bus.subscribe(event, Arc::new(handler));
        self.subscriptions.push(id);
        Ok(id)
    }

    pub fn emit(&self, event: &str, payload: serde_json::Value) -> Result<EventSeq, PluginError> {
        let bus = self
            .bus
            .as_ref()
            .ok_or_else(|| PluginError::NoEventBus(self.plugin_name.clone()))?;
        Ok(bus.emit(event, payload))
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Drop every subscription made through this context.
    pub fn release_subscriptions(&mut self) -> usize {
        let released = self.subscriptions.len();
        if let Some(bus) = &self.bus {
            for id in self.subscriptions.drain(..) {
                bus.unsubscribe(id);
            }
        }
        self.subscriptions.clear();
        released
    }

    // ─── State reporting ─────────────────────────────────────────────

    /// Report a state from inside a lifecycle operation.
    ///
    /// The host only honours `LifecycleState::Error`: reporting it fails the
    /// operation in progress even if the operation returns `Ok(true)`.
    pub fn set_state(&mut self, state: LifecycleState) {
        self.reported_state = Some(state);
    }

    pub fn reported_state(&self) -> Option<LifecycleState> {
        self.reported_state
    }

    pub fn take_reported_state(&mut self) -> Option<LifecycleState> {
        self.reported_state.take()
    }

    // ─── Background tasks ────────────────────────────────────────────

    /// Spawn supervised background work.
    ///
    /// The task receives a token that is cancelled when the plugin stops.
    /// Must be called from within a Tokio runtime.
    pub fn spawn_task<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.cancel.child_token();
        self.tasks.spawn(task(token));
    }

    /// Number of background tasks that have not been reaped yet
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel background tasks, wait up to `grace` for them to exit, then
    /// abort whatever is left. New tasks may be spawned afterwards.
    pub async fn shutdown_tasks(&mut self, grace: Duration) -> TaskShutdown {
        let mut report = TaskShutdown::default();
        if self.tasks.is_empty() {
            self.cancel = CancellationToken::new();
            return report;
        }

        self.cancel.cancel();

        let name = &self.plugin_name;
        let tasks = &mut self.tasks;
        let finished = &mut report.finished;
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                if matches!(&result, Err(e) if e.is_panic()) {
                    tracing::warn!(plugin = %name, "Background task panicked");
                }
                *finished += 1;
            }
        })
        .await
        .is_ok();

        if !drained {
            report.aborted = self.tasks.len();
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
            tracing::warn!(
                plugin = %self.plugin_name,
                aborted = report.aborted,
                "Background tasks ignored cancellation, aborted"
            );
        }

        self.cancel = CancellationToken::new();
        report
    }

    /// Release subscriptions and background tasks.
    pub async fn release(&mut self, grace: Duration) -> TaskShutdown {
        self.release_subscriptions();
        self.shutdown_tasks(grace).await
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_name", &self.plugin_name)
            .field("has_bus", &self.bus.is_some())
            .field("settings", &self.settings)
            .field("subscriptions", &self.subscriptions.len())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
