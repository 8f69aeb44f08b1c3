//! Run enabled plugins until interrupted

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

use ava_core::{PluginConfig, PluginManager};
use ava_plugin_api::APP_SHUTDOWN_REQUESTED;

use super::{manager_config, open_manager};

/// Arguments for the run command
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Extra directory to scan for plugin packages (repeatable)
    #[arg(long = "plugin-dir", value_name = "DIR")]
    pub plugin_dirs: Vec<PathBuf>,

    /// Upper bound in seconds for a single plugin lifecycle operation
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

/// Run the host in the foreground
pub async fn run(args: RunArgs) -> Result<()> {
    let mut settings = manager_config(&args.plugin_dirs);
    settings.lifecycle_timeout = args.timeout.map(std::time::Duration::from_secs);

    let config = PluginConfig::load_default()?;
    let mut manager = open_manager(settings, config);

    if !manager.initialize().await {
        warn!("Some plugins failed to load, see log above");
    }
    print_status(&manager);

    let bus = manager.event_bus();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
        }
        bus.emit(
            APP_SHUTDOWN_REQUESTED,
            serde_json::json!({ "reason": "interrupt" }),
        );
    });

    info!("ava running, press Ctrl-C to stop");
    manager.run_until_shutdown().await;
    Ok(())
}

fn print_status(manager: &PluginManager) {
    let active = manager.active_plugins();
    if active.is_empty() {
        println!("No plugins running");
        return;
    }
    println!("Plugins (load order):");
    for name in &active {
        println!("  {} [{}]", name, manager.plugin_state(name));
    }
}
