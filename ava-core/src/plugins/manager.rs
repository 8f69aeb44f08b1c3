//! PluginManager - drives plugin lifecycles
//!
//! The manager owns the active plugin table and is the only component that
//! calls into plugin code. Every plugin-supplied operation runs behind an
//! isolation boundary: errors, panics and timeouts are caught, logged with
//! the plugin name and operation, move the plugin to `Error`, and surface
//! to the caller as `false`.

use futures_util::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use ava_plugin_api::{
    APP_SHUTDOWN_REQUESTED, BusEvent, EventBus, LifecycleState, PLUGIN_STATE_CHANGED, Plugin,
    PluginClass, PluginContext, PluginDescriptor, PluginInit, SubscriptionId,
};

use super::config::PluginConfigStore;
use super::error::{LifecycleOp, PluginHostError, panic_message};
use super::graph::DependencyGraph;
use super::registry::PluginRegistry;

/// Configuration for PluginManager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Directories scanned for plugin packages (project first, then user)
    pub discovery_paths: Vec<PathBuf>,
    /// Upper bound for a single lifecycle operation; `None` waits forever
    pub lifecycle_timeout: Option<Duration>,
    /// How long cancelled background tasks get to exit before being aborted
    pub task_shutdown_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            discovery_paths: vec![ava_paths::user_plugin_dir()],
            lifecycle_timeout: None,
            task_shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl ManagerConfig {
    /// Prepend `<root>/.ava/plugins` to the discovery paths
    pub fn with_project_dir(mut self, root: &Path) -> Self {
        self.discovery_paths
            .insert(0, ava_paths::project_plugin_dir(root));
        self
    }
}

/// A loaded plugin with its runtime state
struct ActivePlugin {
    instance: Box<dyn Plugin>,
    context: PluginContext,
    state: LifecycleState,
}

/// Snapshot of one plugin as seen by the manager
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    pub name: String,
    pub descriptor: Option<PluginDescriptor>,
    pub active: bool,
    pub enabled: bool,
    pub state: LifecycleState,
    pub missing_dependencies: Vec<String>,
    pub dependents: Vec<String>,
}

pub struct PluginManager {
    /// Active plugins; declared first so instances are dropped before the
    /// registry releases the libraries they came from.
    active: HashMap<String, ActivePlugin>,
    registry: PluginRegistry,
    graph: DependencyGraph,
    /// Registry generation the graph was built from
    graph_generation: u64,
    config: Box<dyn PluginConfigStore>,
    bus: Arc<dyn EventBus>,
    settings: ManagerConfig,
    /// Successful loads in order; drives shutdown order
    load_sequence: Vec<String>,
    shutdown: CancellationToken,
    shutdown_subscription: SubscriptionId,
}

impl PluginManager {
    pub fn new(
        settings: ManagerConfig,
        bus: Arc<dyn EventBus>,
        config: Box<dyn PluginConfigStore>,
    ) -> Self {
        let mut registry = PluginRegistry::new();
        for path in &settings.discovery_paths {
            if path.exists() {
                registry.add_discovery_path(path);
            } else {
                tracing::debug!(dir = %path.display(), "Plugin directory does not exist");
            }
        }

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let shutdown_subscription = bus.subscribe(
            APP_SHUTDOWN_REQUESTED,
            Arc::new(move |_: &BusEvent| {
                tracing::info!("Application shutdown requested");
                token.cancel();
            }),
        );

        Self {
            active: HashMap::new(),
            registry,
            graph: DependencyGraph::new(),
            graph_generation: 0,
            config,
            bus,
            settings,
            load_sequence: Vec::new(),
            shutdown,
            shutdown_subscription,
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn config(&self) -> &dyn PluginConfigStore {
        self.config.as_ref()
    }

    pub fn event_bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }

    /// Names of active plugins, in load order
    pub fn active_plugins(&self) -> Vec<String> {
        self.load_sequence
            .iter()
            .filter(|name| self.active.contains_key(*name))
            .cloned()
            .collect()
    }

    pub fn load_sequence(&self) -> &[String] {
        &self.load_sequence
    }

    /// State of `name`; inactive plugins report `Unloaded`
    pub fn plugin_state(&self, name: &str) -> LifecycleState {
        self.active
            .get(name)
            .map(|entry| entry.state)
            .unwrap_or(LifecycleState::Unloaded)
    }

    /// Cancelled once `app_shutdown_requested` is emitted on the bus
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // ─── Registration ────────────────────────────────────────────────

    pub fn add_discovery_path(&mut self, path: impl AsRef<Path>) -> bool {
        self.registry.add_discovery_path(path)
    }

    pub fn register_plugin_class(&mut self, class: PluginClass) -> bool {
        let registered = self.registry.register_plugin_class(class);
        self.rebuild_graph();
        registered
    }

    /// Remove a registered plugin. Refused while the plugin is active.
    pub fn unregister_plugin(&mut self, name: &str) -> bool {
        if self.active.contains_key(name) {
            tracing::warn!(plugin = %name, "Cannot unregister an active plugin");
            return false;
        }
        let removed = self.registry.unregister_plugin(name);
        self.rebuild_graph();
        removed
    }

    /// Scan discovery paths and register what they export, without loading
    pub fn discover_plugins(&mut self) -> usize {
        let discovered = self.registry.discover_plugins();
        self.rebuild_graph();
        discovered
    }

    /// Rebuild the dependency graph if the registry changed since the last build
    fn rebuild_graph(&mut self) {
        let generation = self.registry.generation();
        if generation == self.graph_generation {
            return;
        }
        self.graph = DependencyGraph::from_descriptors(self.registry.get_all_metadata());
        self.graph_generation = generation;
        tracing::debug!(generation, plugins = self.graph.len(), "Rebuilt dependency graph");
    }

    /// Registry generation the current dependency graph reflects
    pub fn graph_generation(&self) -> u64 {
        self.graph_generation
    }

    // ─── Initialization ──────────────────────────────────────────────

    /// Discover, register, and load every enabled plugin.
    ///
    /// Returns `true` only if every load succeeded and the configuration
    /// was saved.
    pub async fn initialize(&mut self) -> bool {
        let discovered = self.discover_plugins();

        let descriptors = self.registry.get_all_metadata();
        for descriptor in &descriptors {
            self.config
                .apply_defaults_for_plugin(&descriptor.name, &descriptor.config_schema);
        }
        self.config.enable_plugins_by_default(&descriptors);

        let (enabled, stale): (Vec<String>, Vec<String>) = self
            .config
            .get_enabled_plugins()
            .into_iter()
            .partition(|name| self.registry.is_plugin_registered(name));
        for name in &stale {
            tracing::warn!(plugin = %name, "Enabled plugin is not registered, skipping");
        }

        let order = self.calculate_load_order(&enabled);
        tracing::debug!(order = ?order, "Computed load order");

        let mut all_loaded = true;
        for name in &order {
            if !self.load_plugin(name).await {
                all_loaded = false;
            }
        }

        let saved = self.save_config();
        tracing::info!(
            discovered,
            registered = self.registry.len(),
            active = self.active.len(),
            "Plugin manager initialized"
        );
        all_loaded && saved
    }

    /// Order `names` so dependencies come before their dependents
    pub fn calculate_load_order<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        self.graph.load_order(names)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────

    /// Instantiate and load a plugin, starting it if it is enabled.
    ///
    /// Loading an already active plugin is a no-op. A plugin in the error
    /// state must be unloaded first.
    pub async fn load_plugin(&mut self, name: &str) -> bool {
        if let Some(entry) = self.active.get(name) {
            if entry.state == LifecycleState::Error {
                let e = PluginHostError::InErrorState {
                    name: name.to_string(),
                };
                tracing::warn!(plugin = %name, error = %e, "Plugin not loaded");
                return false;
            }
            return true;
        }

        match self.try_load(name).await {
            Ok(()) => {}
            Err(e @ PluginHostError::Declined { .. }) => {
                tracing::info!(plugin = %name, error = %e, "Plugin not loaded");
                return false;
            }
            Err(e) => {
                tracing::error!(plugin = %name, error = %e, "Plugin not loaded");
                return false;
            }
        }

        if self.config.is_plugin_enabled(name) {
            return self.start_plugin(name).await;
        }
        true
    }

    async fn try_load(&mut self, name: &str) -> Result<(), PluginHostError> {
        let (class, descriptor) = match (
            self.registry.get_plugin_class(name),
            self.registry.get_plugin_metadata(name),
        ) {
            (Some(class), Some(descriptor)) => (class.clone(), descriptor.clone()),
            _ => {
                return Err(PluginHostError::NotRegistered {
                    name: name.to_string(),
                });
            }
        };

        let missing = self.registry.check_dependencies(name);
        if !missing.is_empty() {
            return Err(PluginHostError::MissingDependencies {
                name: name.to_string(),
                missing,
            });
        }

        let plugin_settings = self
            .config
            .validate_plugin_settings(name, &descriptor.config_schema);
        let init = PluginInit::new(self.bus.clone(), plugin_settings.clone());
        let mut instance = std::panic::catch_unwind(AssertUnwindSafe(|| class.instantiate(init)))
            .map_err(|payload| PluginHostError::ConstructPanicked {
                name: name.to_string(),
                message: panic_message(payload.as_ref()),
            })?;
        let mut context = PluginContext::new(name, Some(self.bus.clone()), plugin_settings);

        let outcome = invoke(
            name,
            LifecycleOp::Load,
            &mut instance,
            &mut context,
            self.settings.lifecycle_timeout,
        )
        .await;
        if let Err(e) = outcome {
            context.release(self.settings.task_shutdown_grace).await;
            if !matches!(e, PluginHostError::Declined { .. }) {
                self.emit_state_change(name, LifecycleState::Unloaded, LifecycleState::Error);
            }
            return Err(e);
        }

        self.active.insert(
            name.to_string(),
            ActivePlugin {
                instance,
                context,
                state: LifecycleState::Loaded,
            },
        );
        self.load_sequence.retain(|n| n != name);
        self.load_sequence.push(name.to_string());
        self.emit_state_change(name, LifecycleState::Unloaded, LifecycleState::Loaded);
        tracing::info!(plugin = %name, version = %descriptor.version, "Plugin loaded");
        Ok(())
    }

    /// Start a loaded or stopped plugin
    pub async fn start_plugin(&mut self, name: &str) -> bool {
        let timeout = self.settings.lifecycle_timeout;
        let Some(entry) = self.active.get_mut(name) else {
            tracing::warn!(plugin = %name, "Cannot start plugin that is not loaded");
            return false;
        };

        match entry.state {
            LifecycleState::Started => return true,
            LifecycleState::Loaded | LifecycleState::Stopped => {}
            state => {
                tracing::warn!(plugin = %name, state = %state, "Cannot start plugin");
                return false;
            }
        }

        let outcome = invoke(
            name,
            LifecycleOp::Start,
            &mut entry.instance,
            &mut entry.context,
            timeout,
        )
        .await;
        match outcome {
            Ok(()) => {
                self.transition(name, LifecycleState::Started);
                tracing::info!(plugin = %name, "Plugin started");
                true
            }
            Err(e @ PluginHostError::Declined { .. }) => {
                tracing::info!(plugin = %name, error = %e, "Plugin not started");
                false
            }
            Err(e) => {
                self.fail(name, e).await;
                false
            }
        }
    }

    /// Stop a started plugin.
    ///
    /// Refused while any plugin that depends on it is started. Stopping a
    /// plugin that is not started is a no-op.
    pub async fn stop_plugin(&mut self, name: &str) -> bool {
        if self.plugin_state(name) != LifecycleState::Started {
            return true;
        }

        let dependents = self.started_dependents(name);
        if !dependents.is_empty() {
            let e = PluginHostError::ActiveDependents {
                name: name.to_string(),
                dependents,
            };
            tracing::warn!(plugin = %name, error = %e, "Plugin not stopped");
            return false;
        }

        let timeout = self.settings.lifecycle_timeout;
        let grace = self.settings.task_shutdown_grace;
        let Some(entry) = self.active.get_mut(name) else {
            return true;
        };

        let outcome = invoke(
            name,
            LifecycleOp::Stop,
            &mut entry.instance,
            &mut entry.context,
            timeout,
        )
        .await;
        match outcome {
            Ok(()) => {
                entry.context.release(grace).await;
                self.transition(name, LifecycleState::Stopped);
                tracing::info!(plugin = %name, "Plugin stopped");
                true
            }
            Err(e) => {
                self.fail(name, e).await;
                false
            }
        }
    }

    /// Unload a plugin, stopping it first if needed.
    ///
    /// A plugin in the error state is force-unloaded: its unload operation
    /// is attempted and the entry is removed whatever the outcome.
    pub async fn unload_plugin(&mut self, name: &str) -> bool {
        match self.active.get(name).map(|entry| entry.state) {
            None => return true,
            Some(LifecycleState::Error) => {
                self.force_unload(name).await;
                return true;
            }
            Some(LifecycleState::Started) => {
                if !self.stop_plugin(name).await {
                    tracing::warn!(plugin = %name, "Plugin not unloaded, stop failed");
                    return false;
                }
            }
            Some(_) => {}
        }

        let timeout = self.settings.lifecycle_timeout;
        let Some(entry) = self.active.get_mut(name) else {
            return true;
        };
        let outcome = invoke(
            name,
            LifecycleOp::Unload,
            &mut entry.instance,
            &mut entry.context,
            timeout,
        )
        .await;
        match outcome {
            Ok(()) => {
                self.remove_active(name).await;
                tracing::info!(plugin = %name, "Plugin unloaded");
                true
            }
            Err(e) => {
                self.fail(name, e).await;
                false
            }
        }
    }

    async fn force_unload(&mut self, name: &str) {
        let timeout = self.settings.lifecycle_timeout;
        if let Some(entry) = self.active.get_mut(name) {
            let outcome = invoke(
                name,
                LifecycleOp::Unload,
                &mut entry.instance,
                &mut entry.context,
                timeout,
            )
            .await;
            if let Err(e) = outcome {
                tracing::warn!(plugin = %name, error = %e, "Forced unload of failed plugin");
            }
        }
        self.remove_active(name).await;
        tracing::info!(plugin = %name, "Failed plugin removed");
    }

    async fn remove_active(&mut self, name: &str) {
        let Some(mut entry) = self.active.remove(name) else {
            return;
        };
        entry.context.release(self.settings.task_shutdown_grace).await;
        self.load_sequence.retain(|n| n != name);
        self.emit_state_change(name, entry.state, LifecycleState::Unloaded);
    }

    /// Unload and load a plugin again, restarting it if it was started
    pub async fn reload_plugin(&mut self, name: &str) -> bool {
        let was_started = self.plugin_state(name) == LifecycleState::Started;
        if !self.unload_plugin(name).await {
            return false;
        }
        if !self.load_plugin(name).await {
            return false;
        }
        if was_started && self.plugin_state(name) != LifecycleState::Started {
            return self.start_plugin(name).await;
        }
        true
    }

    // ─── Enable / disable ────────────────────────────────────────────

    /// Mark a plugin enabled, then load and start it.
    ///
    /// If loading or starting fails the flag is rolled back to disabled,
    /// even if it was already set.
    pub async fn enable_plugin(&mut self, name: &str) -> bool {
        if !self.registry.is_plugin_registered(name) {
            tracing::warn!(plugin = %name, "Cannot enable unregistered plugin");
            return false;
        }

        self.config.enable_plugin(name);
        self.save_config();

        if !self.active.contains_key(name) && !self.load_plugin(name).await {
            self.rollback_enable(name);
            return false;
        }

        if self.plugin_state(name) != LifecycleState::Started && !self.start_plugin(name).await {
            self.rollback_enable(name);
            return false;
        }

        tracing::info!(plugin = %name, "Plugin enabled");
        self.save_config()
    }

    fn rollback_enable(&mut self, name: &str) {
        self.config.disable_plugin(name);
        self.save_config();
        tracing::warn!(plugin = %name, "Enabling plugin failed, rolled back");
    }

    /// Mark a plugin disabled and stop it.
    ///
    /// The flag sticks even if stopping fails; the plugin may still be
    /// running afterwards. Returns whether the flag was persisted.
    pub async fn disable_plugin(&mut self, name: &str) -> bool {
        self.config.disable_plugin(name);
        let saved = self.save_config();

        if !self.stop_plugin(name).await {
            tracing::warn!(plugin = %name, "Plugin disabled but could not be stopped");
        } else {
            tracing::info!(plugin = %name, "Plugin disabled");
        }
        saved
    }

    // ─── Status ──────────────────────────────────────────────────────

    pub fn get_plugin_status(&self, name: &str) -> Option<PluginStatus> {
        let descriptor = self.registry.get_plugin_metadata(name).cloned();
        let active = self.active.contains_key(name);
        if descriptor.is_none() && !active {
            return None;
        }

        let missing_dependencies = if descriptor.is_some() {
            self.registry.check_dependencies(name)
        } else {
            Vec::new()
        };

        Some(PluginStatus {
            name: name.to_string(),
            descriptor,
            active,
            enabled: self.config.is_plugin_enabled(name),
            state: self.plugin_state(name),
            missing_dependencies,
            dependents: self.graph.dependents(name).map(str::to_string).collect(),
        })
    }

    /// Status of every registered or active plugin, ordered by name
    pub fn get_all_plugin_status(&self) -> Vec<PluginStatus> {
        let mut names = self.registry.plugin_names();
        for name in self.active.keys() {
            if !self.registry.is_plugin_registered(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        names
            .iter()
            .filter_map(|name| self.get_plugin_status(name))
            .collect()
    }

    // ─── Shutdown ────────────────────────────────────────────────────

    /// Unload every active plugin in reverse load order, then persist config
    pub async fn shutdown(&mut self) {
        let order: Vec<String> = self.active_plugins().into_iter().rev().collect();
        tracing::info!(plugins = order.len(), "Shutting down plugins");

        for name in &order {
            if !self.unload_plugin(name).await {
                tracing::error!(plugin = %name, "Plugin failed to unload during shutdown");
            }
        }

        // Left over: failed to unload (now in error) or could not be stopped
        // while a dependent was still running
        let leftover: Vec<String> = self.active.keys().cloned().collect();
        for name in &leftover {
            self.unload_plugin(name).await;
        }

        self.save_config();
        tracing::info!("Plugin shutdown complete");
    }

    /// Wait for `app_shutdown_requested`, then shut down
    pub async fn run_until_shutdown(&mut self) {
        let signal = self.shutdown.clone();
        signal.cancelled().await;
        self.shutdown().await;
    }

    // ─── Internals ───────────────────────────────────────────────────

    fn started_dependents(&self, name: &str) -> Vec<String> {
        self.graph
            .dependents(name)
            .filter(|dependent| self.plugin_state(dependent) == LifecycleState::Started)
            .map(str::to_string)
            .collect()
    }

    async fn fail(&mut self, name: &str, error: PluginHostError) {
        tracing::error!(plugin = %name, error = %error, "Plugin failed");
        let grace = self.settings.task_shutdown_grace;
        if let Some(entry) = self.active.get_mut(name) {
            entry.context.release(grace).await;
        }
        self.transition(name, LifecycleState::Error);
    }

    fn transition(&mut self, name: &str, next: LifecycleState) {
        let Some(entry) = self.active.get_mut(name) else {
            return;
        };
        let previous = entry.state;
        debug_assert!(
            previous.can_transition_to(next),
            "illegal transition {previous} -> {next}"
        );
        entry.state = next;
        self.emit_state_change(name, previous, next);
    }

    fn emit_state_change(&self, name: &str, old: LifecycleState, new: LifecycleState) {
        self.bus.emit(
            PLUGIN_STATE_CHANGED,
            serde_json::json!({
                "plugin": name,
                "old_state": old,
                "new_state": new,
            }),
        );
    }

    fn save_config(&mut self) -> bool {
        match self.config.save_config() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to save plugin config");
                false
            }
        }
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.shutdown_subscription);
    }
}

/// Run one plugin-supplied operation behind the isolation boundary.
///
/// `Ok(false)` from the plugin becomes `Declined`; a reported `Error` state
/// fails the operation even if it returned `Ok(true)`.
async fn invoke(
    name: &str,
    op: LifecycleOp,
    instance: &mut Box<dyn Plugin>,
    context: &mut PluginContext,
    timeout: Option<Duration>,
) -> Result<(), PluginHostError> {
    context.take_reported_state();

    let call = AssertUnwindSafe(async {
        match op {
            LifecycleOp::Load => instance.load(context).await,
            LifecycleOp::Start => instance.start(context).await,
            LifecycleOp::Stop => instance.stop(context).await,
            LifecycleOp::Unload => instance.unload(context).await,
        }
    })
    .catch_unwind();

    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
            PluginHostError::Timeout {
                name: name.to_string(),
                op,
                timeout: limit,
            }
        })?,
        None => call.await,
    };

    let accepted = match outcome {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(source)) => {
            return Err(PluginHostError::Lifecycle {
                name: name.to_string(),
                op,
                source,
            });
        }
        Err(payload) => {
            return Err(PluginHostError::Panicked {
                name: name.to_string(),
                op,
                message: panic_message(payload.as_ref()),
            });
        }
    };

    if context.take_reported_state() == Some(LifecycleState::Error) {
        return Err(PluginHostError::ReportedError {
            name: name.to_string(),
            op,
        });
    }
    if !accepted {
        return Err(PluginHostError::Declined {
            name: name.to_string(),
            op,
        });
    }
    Ok(())
}
