//! End-to-end lifecycle tests for PluginManager using scripted plugins.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ava_core::events::{EventBus, MemoryEventBus, PLUGIN_STATE_CHANGED};
use ava_core::plugins::{ManagerConfig, PluginConfig, PluginManager};
use ava_plugin_api::{
    APP_SHUTDOWN_REQUESTED, ConfigOption, LifecycleState, Plugin, PluginClass, PluginContext,
    PluginDescriptor, PluginError, SettingType,
};

type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone, Copy, Default)]
enum Behavior {
    #[default]
    Accept,
    Decline,
    Fail,
    Panic,
    ReportError,
    Hang,
}

#[derive(Debug, Clone, Default)]
struct Script {
    load: Behavior,
    start: Behavior,
    stop: Behavior,
    unload: Behavior,
    /// Spawn a background task on start that exits when cancelled
    background: bool,
}

struct Scripted {
    descriptor: PluginDescriptor,
    script: Script,
    journal: Journal,
}

impl Scripted {
    async fn run(
        &self,
        op: &str,
        behavior: Behavior,
        ctx: &mut PluginContext,
    ) -> Result<bool, PluginError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.descriptor.name, op));
        match behavior {
            Behavior::Accept => Ok(true),
            Behavior::Decline => Ok(false),
            Behavior::Fail => Err(PluginError::custom(format!("{op} failed"))),
            Behavior::Panic => panic!("{op} panicked"),
            Behavior::ReportError => {
                ctx.set_state(LifecycleState::Error);
                Ok(true)
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl Plugin for Scripted {
    fn descriptor(&self) -> PluginDescriptor {
        self.descriptor.clone()
    }

    async fn load(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError> {
        self.run("load", self.script.load, ctx).await
    }

    async fn start(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError> {
        if self.script.background {
            let journal = self.journal.clone();
            let name = self.descriptor.name.clone();
            ctx.spawn_task(move |token| async move {
                token.cancelled().await;
                journal.lock().unwrap().push(format!("{name}:task-cancelled"));
            });
        }
        self.run("start", self.script.start, ctx).await
    }

    async fn stop(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError> {
        self.run("stop", self.script.stop, ctx).await
    }

    async fn unload(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError> {
        self.run("unload", self.script.unload, ctx).await
    }
}

struct Harness {
    manager: PluginManager,
    bus: Arc<MemoryEventBus>,
    journal: Journal,
}

impl Harness {
    fn new() -> Self {
        let bus = Arc::new(MemoryEventBus::default());
        let settings = ManagerConfig {
            discovery_paths: Vec::new(),
            lifecycle_timeout: Some(Duration::from_millis(200)),
            task_shutdown_grace: Duration::from_millis(200),
        };
        let manager = PluginManager::new(settings, bus.clone(), Box::new(PluginConfig::in_memory()));
        Self {
            manager,
            bus,
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn descriptor(name: &str, deps: &[&str]) -> PluginDescriptor {
        let mut descriptor = PluginDescriptor::new(name, "1.0.0")
            .with_description(format!("{name} plugin"))
            .with_author("tests");
        for dep in deps {
            descriptor = descriptor.depends_on(*dep);
        }
        descriptor
    }

    fn register(&mut self, name: &str, deps: &[&str], script: Script) -> bool {
        self.register_descriptor(Self::descriptor(name, deps), script)
    }

    fn register_descriptor(&mut self, descriptor: PluginDescriptor, script: Script) -> bool {
        let journal = self.journal.clone();
        let class = PluginClass::new(descriptor.name.clone(), move |_init| {
            Box::new(Scripted {
                descriptor: descriptor.clone(),
                script: script.clone(),
                journal: journal.clone(),
            })
        });
        self.manager.register_plugin_class(class)
    }

    /// Journal entries for one operation kind, e.g. "unload"
    fn calls(&self, op: &str) -> Vec<String> {
        let suffix = format!(":{op}");
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter_map(|entry| entry.strip_suffix(&suffix).map(str::to_string))
            .collect()
    }

    fn state(&self, name: &str) -> LifecycleState {
        self.manager.plugin_state(name)
    }
}

// ==================== Load ordering ====================

#[tokio::test]
async fn test_chain_loads_in_dependency_order_and_shuts_down_in_reverse() {
    let mut h = Harness::new();
    h.register("c", &["b"], Script::default());
    h.register("a", &[], Script::default());
    h.register("b", &["a"], Script::default());

    assert!(h.manager.initialize().await);
    assert_eq!(h.calls("load"), vec!["a", "b", "c"]);
    assert_eq!(h.calls("start"), vec!["a", "b", "c"]);
    assert_eq!(h.manager.active_plugins(), vec!["a", "b", "c"]);

    h.manager.shutdown().await;
    assert_eq!(h.calls("stop"), vec!["c", "b", "a"]);
    assert_eq!(h.calls("unload"), vec!["c", "b", "a"]);
    assert!(h.manager.active_plugins().is_empty());
}

#[tokio::test]
async fn test_cyclic_descriptors_produce_each_name_once() {
    let mut h = Harness::new();
    h.register("x", &["y"], Script::default());
    h.register("y", &["x"], Script::default());

    let order = h.manager.calculate_load_order(&["x", "y"]);
    assert_eq!(order.len(), 2);
    assert!(order.contains(&"x".to_string()));
    assert!(order.contains(&"y".to_string()));
    assert_eq!(order, h.manager.calculate_load_order(&["y", "x"]));
}

// ==================== Dependencies ====================

#[tokio::test]
async fn test_missing_dependency_blocks_load() {
    let mut h = Harness::new();
    h.register("d", &["z"], Script::default());

    assert!(!h.manager.load_plugin("d").await);
    assert_eq!(h.manager.registry().check_dependencies("d"), vec!["z"]);
    assert!(h.calls("load").is_empty());
    assert_eq!(h.state("d"), LifecycleState::Unloaded);

    let status = h.manager.get_plugin_status("d").unwrap();
    assert!(!status.active);
    assert_eq!(status.missing_dependencies, vec!["z"]);
}

#[tokio::test]
async fn test_stop_refused_while_dependent_is_started() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    h.register("b", &["a"], Script::default());
    assert!(h.manager.initialize().await);

    assert!(!h.manager.stop_plugin("a").await);
    assert_eq!(h.state("a"), LifecycleState::Started);
    assert!(h.calls("stop").is_empty());

    assert!(h.manager.stop_plugin("b").await);
    assert!(h.manager.stop_plugin("a").await);
    assert_eq!(h.state("a"), LifecycleState::Stopped);
    assert_eq!(h.state("b"), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_unload_of_dependency_with_started_dependent_fails_without_mutation() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    h.register("b", &["a"], Script::default());
    assert!(h.manager.initialize().await);

    assert!(!h.manager.unload_plugin("a").await);
    assert_eq!(h.state("a"), LifecycleState::Started);
    assert!(h.calls("unload").is_empty());
}

// ==================== Idempotence ====================

#[tokio::test]
async fn test_load_is_idempotent() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());

    assert!(h.manager.load_plugin("a").await);
    assert!(h.manager.load_plugin("a").await);
    assert_eq!(h.calls("load"), vec!["a"]);
    assert_eq!(h.manager.active_plugins(), vec!["a"]);
    // Not enabled, so not started
    assert_eq!(h.state("a"), LifecycleState::Loaded);
}

#[tokio::test]
async fn test_start_stop_unload_are_idempotent() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    assert!(h.manager.load_plugin("a").await);

    assert!(h.manager.start_plugin("a").await);
    assert!(h.manager.start_plugin("a").await);
    assert_eq!(h.calls("start").len(), 1);

    assert!(h.manager.stop_plugin("a").await);
    assert!(h.manager.stop_plugin("a").await);
    assert_eq!(h.calls("stop").len(), 1);

    assert!(h.manager.unload_plugin("a").await);
    assert!(h.manager.unload_plugin("a").await);
    assert_eq!(h.calls("unload").len(), 1);
    assert!(h.manager.stop_plugin("a").await);
}

#[tokio::test]
async fn test_start_requires_load() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    assert!(!h.manager.start_plugin("a").await);
    assert!(!h.manager.start_plugin("ghost").await);
}

#[tokio::test]
async fn test_duplicate_registration_keeps_first_class() {
    let mut h = Harness::new();
    assert!(h.register("a", &[], Script::default()));
    assert!(!h.register("a", &["b"], Script::default()));

    let descriptor = h.manager.registry().get_plugin_metadata("a").unwrap();
    assert!(descriptor.dependencies.is_empty());
    assert!(h.manager.graph().dependencies("a").next().is_none());
}

// ==================== Failure isolation ====================

#[tokio::test]
async fn test_erroring_start_moves_plugin_to_error() {
    let mut h = Harness::new();
    h.register(
        "e",
        &[],
        Script {
            start: Behavior::Fail,
            ..Default::default()
        },
    );
    assert!(h.manager.load_plugin("e").await);

    assert!(!h.manager.start_plugin("e").await);
    let status = h.manager.get_plugin_status("e").unwrap();
    assert_eq!(status.state, LifecycleState::Error);
    assert_eq!(status.state.to_string(), "error");

    // Error is terminal until unloaded
    assert!(!h.manager.start_plugin("e").await);
    assert!(!h.manager.load_plugin("e").await);
}

#[tokio::test]
async fn test_panicking_start_is_contained() {
    let mut h = Harness::new();
    h.register(
        "p",
        &[],
        Script {
            start: Behavior::Panic,
            ..Default::default()
        },
    );
    h.register("ok", &[], Script::default());
    assert!(!h.manager.initialize().await);

    assert_eq!(h.state("p"), LifecycleState::Error);
    assert_eq!(h.state("ok"), LifecycleState::Started);
}

#[tokio::test]
async fn test_reported_error_state_fails_operation() {
    let mut h = Harness::new();
    h.register(
        "r",
        &[],
        Script {
            start: Behavior::ReportError,
            ..Default::default()
        },
    );
    assert!(h.manager.load_plugin("r").await);
    assert!(!h.manager.start_plugin("r").await);
    assert_eq!(h.state("r"), LifecycleState::Error);
}

#[tokio::test]
async fn test_hanging_operation_times_out() {
    let mut h = Harness::new();
    h.register(
        "slow",
        &[],
        Script {
            start: Behavior::Hang,
            ..Default::default()
        },
    );
    assert!(h.manager.load_plugin("slow").await);
    assert!(!h.manager.start_plugin("slow").await);
    assert_eq!(h.state("slow"), LifecycleState::Error);
}

#[tokio::test]
async fn test_declined_start_leaves_state_unchanged() {
    let mut h = Harness::new();
    h.register(
        "shy",
        &[],
        Script {
            start: Behavior::Decline,
            ..Default::default()
        },
    );
    assert!(h.manager.load_plugin("shy").await);
    assert!(!h.manager.start_plugin("shy").await);
    assert_eq!(h.state("shy"), LifecycleState::Loaded);
}

#[tokio::test]
async fn test_failed_load_records_nothing() {
    let mut h = Harness::new();
    h.register(
        "broken",
        &[],
        Script {
            load: Behavior::Fail,
            ..Default::default()
        },
    );
    h.register(
        "declines",
        &[],
        Script {
            load: Behavior::Decline,
            ..Default::default()
        },
    );

    assert!(!h.manager.load_plugin("broken").await);
    assert!(!h.manager.load_plugin("declines").await);
    assert!(h.manager.active_plugins().is_empty());
    assert_eq!(h.state("broken"), LifecycleState::Unloaded);
}

#[tokio::test]
async fn test_failed_unload_keeps_entry_until_forced() {
    let mut h = Harness::new();
    h.register(
        "sticky",
        &[],
        Script {
            unload: Behavior::Fail,
            ..Default::default()
        },
    );
    assert!(h.manager.load_plugin("sticky").await);

    assert!(!h.manager.unload_plugin("sticky").await);
    assert_eq!(h.state("sticky"), LifecycleState::Error);
    assert_eq!(h.manager.active_plugins(), vec!["sticky"]);

    // Forced cleanup from the error state always removes the entry
    assert!(h.manager.unload_plugin("sticky").await);
    assert!(h.manager.active_plugins().is_empty());
    assert_eq!(h.calls("unload").len(), 2);
}

#[tokio::test]
async fn test_failed_stop_sets_error_and_aborts_unload() {
    let mut h = Harness::new();
    h.register(
        "s",
        &[],
        Script {
            stop: Behavior::Fail,
            ..Default::default()
        },
    );
    assert!(h.manager.load_plugin("s").await);
    assert!(h.manager.start_plugin("s").await);

    assert!(!h.manager.unload_plugin("s").await);
    assert_eq!(h.state("s"), LifecycleState::Error);
    assert!(h.calls("unload").is_empty());
}

#[tokio::test]
async fn test_shutdown_continues_past_failures() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    h.register(
        "b",
        &["a"],
        Script {
            unload: Behavior::Panic,
            ..Default::default()
        },
    );
    h.register("c", &["b"], Script::default());
    assert!(h.manager.initialize().await);

    h.manager.shutdown().await;
    assert!(h.manager.active_plugins().is_empty());
    assert_eq!(h.calls("stop"), vec!["c", "b", "a"]);
}

// ==================== Enable / disable ====================

#[tokio::test]
async fn test_enable_loads_and_starts() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());

    assert!(h.manager.enable_plugin("a").await);
    assert_eq!(h.state("a"), LifecycleState::Started);
    assert!(h.manager.config().is_plugin_enabled("a"));
}

#[tokio::test]
async fn test_enable_starts_loaded_plugin() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    assert!(h.manager.load_plugin("a").await);
    assert_eq!(h.state("a"), LifecycleState::Loaded);

    assert!(h.manager.enable_plugin("a").await);
    assert_eq!(h.state("a"), LifecycleState::Started);
    assert_eq!(h.calls("load").len(), 1);
}

#[tokio::test]
async fn test_enable_rolls_back_on_load_failure() {
    let mut h = Harness::new();
    h.register(
        "a",
        &[],
        Script {
            load: Behavior::Fail,
            ..Default::default()
        },
    );

    assert!(!h.manager.enable_plugin("a").await);
    assert!(!h.manager.config().is_plugin_enabled("a"));
    assert!(h.manager.active_plugins().is_empty());
}

#[tokio::test]
async fn test_enable_rolls_back_on_start_failure() {
    let mut h = Harness::new();
    h.register(
        "a",
        &[],
        Script {
            start: Behavior::Fail,
            ..Default::default()
        },
    );

    assert!(!h.manager.enable_plugin("a").await);
    assert!(!h.manager.config().is_plugin_enabled("a"));
    assert_eq!(h.state("a"), LifecycleState::Error);
}

#[tokio::test]
async fn test_enable_rolls_back_flag_that_was_already_set() {
    let mut h = Harness::new();
    h.register(
        "a",
        &[],
        Script {
            load: Behavior::Fail,
            ..Default::default()
        },
    );

    // Enabled by default, so initialize already tried and failed
    assert!(!h.manager.initialize().await);
    assert!(h.manager.config().is_plugin_enabled("a"));

    assert!(!h.manager.enable_plugin("a").await);
    assert!(!h.manager.config().is_plugin_enabled("a"));
    assert!(h.manager.active_plugins().is_empty());
}

#[tokio::test]
async fn test_enable_unregistered_plugin_fails() {
    let mut h = Harness::new();
    assert!(!h.manager.enable_plugin("ghost").await);
    assert!(!h.manager.config().is_plugin_enabled("ghost"));
}

#[tokio::test]
async fn test_disable_sticks_even_when_stop_fails() {
    let mut h = Harness::new();
    h.register(
        "a",
        &[],
        Script {
            stop: Behavior::Fail,
            ..Default::default()
        },
    );
    assert!(h.manager.enable_plugin("a").await);

    assert!(h.manager.disable_plugin("a").await);
    assert!(!h.manager.config().is_plugin_enabled("a"));
    assert_eq!(h.state("a"), LifecycleState::Error);
}

#[tokio::test]
async fn test_disable_blocked_by_dependent_keeps_running() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    h.register("b", &["a"], Script::default());
    assert!(h.manager.initialize().await);

    assert!(h.manager.disable_plugin("a").await);
    assert!(!h.manager.config().is_plugin_enabled("a"));
    assert_eq!(h.state("a"), LifecycleState::Started);
}

#[tokio::test]
async fn test_disabled_plugins_are_not_loaded_on_initialize() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    h.register_descriptor(
        Harness::descriptor("off", &[]).enabled_by_default(false),
        Script::default(),
    );

    assert!(h.manager.initialize().await);
    assert_eq!(h.manager.active_plugins(), vec!["a"]);
    assert_eq!(h.state("off"), LifecycleState::Unloaded);
}

// ==================== Reload ====================

#[tokio::test]
async fn test_reload_restarts_started_plugin() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    assert!(h.manager.load_plugin("a").await);
    assert!(h.manager.start_plugin("a").await);

    assert!(h.manager.reload_plugin("a").await);
    assert_eq!(h.state("a"), LifecycleState::Started);
    assert_eq!(h.calls("load").len(), 2);
    assert_eq!(h.calls("unload").len(), 1);
    assert_eq!(h.calls("start").len(), 2);
}

// ==================== Background work and events ====================

#[tokio::test]
async fn test_stop_cancels_background_tasks() {
    let mut h = Harness::new();
    h.register(
        "worker",
        &[],
        Script {
            background: true,
            ..Default::default()
        },
    );
    assert!(h.manager.enable_plugin("worker").await);
    assert!(h.calls("task-cancelled").is_empty());

    assert!(h.manager.stop_plugin("worker").await);
    assert_eq!(h.calls("task-cancelled"), vec!["worker"]);
}

#[tokio::test]
async fn test_transitions_are_published() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    assert!(h.manager.enable_plugin("a").await);
    assert!(h.manager.unload_plugin("a").await);

    let transitions: Vec<(String, String)> = h
        .bus
        .events_named(PLUGIN_STATE_CHANGED)
        .iter()
        .map(|event| {
            (
                event.payload["old_state"].as_str().unwrap().to_string(),
                event.payload["new_state"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    let expected = [
        ("unloaded", "loaded"),
        ("loaded", "started"),
        ("started", "stopped"),
        ("stopped", "unloaded"),
    ];
    assert_eq!(
        transitions,
        expected
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_shutdown_request_event_triggers_shutdown() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    assert!(h.manager.initialize().await);

    let signal = h.manager.shutdown_signal();
    assert!(!signal.is_cancelled());
    h.bus.emit(APP_SHUTDOWN_REQUESTED, serde_json::Value::Null);
    assert!(signal.is_cancelled());

    h.manager.run_until_shutdown().await;
    assert!(h.manager.active_plugins().is_empty());
}

// ==================== Settings ====================

#[tokio::test]
async fn test_initialize_applies_schema_defaults() {
    let bus = Arc::new(MemoryEventBus::default());
    let seen: Arc<Mutex<Option<toml::Table>>> = Arc::new(Mutex::new(None));
    let sink = seen.clone();

    let mut config = PluginConfig::in_memory();
    config.set_plugin_setting("tuned", "rate", toml::Value::String("12".into()));
    let settings = ManagerConfig {
        discovery_paths: Vec::new(),
        ..ManagerConfig::default()
    };
    let mut manager = PluginManager::new(settings, bus, Box::new(config));

    let descriptor = Harness::descriptor("tuned", &[])
        .with_option("rate", ConfigOption::new(SettingType::Int).with_default(1i64))
        .with_option("label", ConfigOption::new(SettingType::Str).with_default("x"));
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    manager.register_plugin_class(PluginClass::new("tuned", move |init| {
        *sink.lock().unwrap() = Some(init.settings.clone());
        Box::new(Scripted {
            descriptor: descriptor.clone(),
            script: Script::default(),
            journal: journal.clone(),
        })
    }));

    assert!(manager.initialize().await);
    let received = seen.lock().unwrap().clone().unwrap();
    assert_eq!(received.get("rate"), Some(&toml::Value::Integer(12)));
    assert_eq!(received.get("label"), Some(&toml::Value::String("x".into())));
}

#[tokio::test]
async fn test_status_reports_every_plugin() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    h.register("b", &["a"], Script::default());
    assert!(h.manager.load_plugin("a").await);

    let all = h.manager.get_all_plugin_status();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].name, "a");
    assert!(all[0].active);
    assert_eq!(all[0].dependents, vec!["b"]);
    assert_eq!(all[1].state, LifecycleState::Unloaded);
    assert!(h.manager.get_plugin_status("ghost").is_none());
}

// ==================== Registration ====================

#[tokio::test]
async fn test_unregister_refused_while_active() {
    let mut h = Harness::new();
    h.register("a", &[], Script::default());
    h.register("b", &["a"], Script::default());
    assert!(h.manager.load_plugin("a").await);
    let generation = h.manager.graph_generation();

    assert!(!h.manager.unregister_plugin("a"));
    assert!(h.manager.registry().is_plugin_registered("a"));
    assert_eq!(h.manager.graph_generation(), generation);

    assert!(h.manager.unload_plugin("a").await);
    assert!(h.manager.unregister_plugin("a"));
    assert!(!h.manager.registry().is_plugin_registered("a"));
    assert!(h.manager.graph_generation() > generation);
    assert!(!h.manager.graph().contains("a"));
    assert_eq!(h.manager.registry().check_dependencies("b"), vec!["a"]);
    assert!(!h.manager.unregister_plugin("a"));
}
