//! Plugin management commands
//!
//! These commands edit the persisted plugin configuration; they never start
//! plugins. Use `ava run` to drive plugin lifecycles.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use std::path::PathBuf;

use ava_core::plugins::coerce_setting;
use ava_core::{ManagerConfig, PluginConfig, PluginConfigStore, PluginManager, PluginStatus};

use super::{manager_config, open_manager};

/// Plugin management arguments
#[derive(Args)]
pub struct PluginArgs {
    #[command(subcommand)]
    pub command: PluginCommands,
}

/// Plugin subcommands
#[derive(Subcommand)]
pub enum PluginCommands {
    /// List known plugins
    List {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Show plugin details
    Info {
        /// Plugin name
        name: String,
    },
    /// Enable a plugin
    Enable {
        /// Plugin name to enable
        name: String,
    },
    /// Disable a plugin
    Disable {
        /// Plugin name to disable
        name: String,
    },
    /// Store a plugin setting
    Set {
        /// Plugin name
        name: String,
        /// Setting key
        key: String,
        /// TOML value; bare words are stored as strings
        value: String,
    },
}

/// Where plugin commands read and write state
struct PluginEnv {
    config_path: PathBuf,
    settings: ManagerConfig,
}

impl PluginEnv {
    fn config(&self) -> Result<PluginConfig> {
        Ok(PluginConfig::load(&self.config_path)?)
    }

    /// Registered plugins, with an in-memory config so nothing is persisted
    fn catalog(&self) -> PluginManager {
        open_manager(self.settings.clone(), PluginConfig::in_memory())
    }
}

/// Run plugin command
pub fn run(args: PluginArgs) -> Result<()> {
    let env = PluginEnv {
        config_path: ava_paths::plugin_config_path(),
        settings: manager_config(&[]),
    };

    match args.command {
        PluginCommands::List { json } => list_plugins(&env, json),
        PluginCommands::Info { name } => show_plugin_info(&env, &name),
        PluginCommands::Enable { name } => enable_plugin(&env, &name),
        PluginCommands::Disable { name } => disable_plugin(&env, &name),
        PluginCommands::Set { name, key, value } => set_setting(&env, &name, &key, &value),
    }
}

/// Status rows with `enabled` as the next run would see it
fn effective_status(env: &PluginEnv) -> Result<Vec<PluginStatus>> {
    let config = env.config()?;
    let mut statuses = env.catalog().get_all_plugin_status();
    for status in &mut statuses {
        status.enabled = config.is_plugin_enabled(&status.name)
            || (!config.is_known(&status.name)
                && status
                    .descriptor
                    .as_ref()
                    .is_some_and(|d| d.enabled_by_default));
    }
    Ok(statuses)
}

fn list_plugins(env: &PluginEnv, json: bool) -> Result<()> {
    let statuses = effective_status(env)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    if statuses.is_empty() {
        println!("No plugins installed");
        println!();
        println!("Plugin directory: {}", ava_paths::user_plugin_dir().display());
        return Ok(());
    }

    for status in &statuses {
        let marker = if !status.missing_dependencies.is_empty() {
            "✗"
        } else if status.enabled {
            "✓"
        } else {
            "○"
        };
        let (version, description) = match &status.descriptor {
            Some(d) => (d.version.as_str(), d.description.as_str()),
            None => ("?", "No description"),
        };
        println!("{} {} v{}    {}", marker, status.name, version, description);
    }

    Ok(())
}

fn show_plugin_info(env: &PluginEnv, name: &str) -> Result<()> {
    let statuses = effective_status(env)?;
    let Some(status) = statuses.iter().find(|s| s.name == name) else {
        println!("Plugin '{}' not found", name);
        println!();
        println!("Run 'ava plugin list' to see all plugins.");
        return Ok(());
    };
    let Some(d) = &status.descriptor else {
        bail!("Plugin '{}' has no descriptor", name);
    };

    println!("Name:        {}", d.name);
    println!("Version:     {}", d.version);
    println!("Author:      {}", d.author);
    println!("Description: {}", d.description);
    println!(
        "Status:      {}",
        if status.enabled { "Enabled" } else { "Disabled" }
    );

    if !d.dependencies.is_empty() {
        println!();
        println!("Depends on:");
        for dep in &d.dependencies {
            let note = if status.missing_dependencies.contains(dep) {
                " (missing)"
            } else {
                ""
            };
            println!("  {}{}", dep, note);
        }
    }
    if !status.dependents.is_empty() {
        println!();
        println!("Required by: {}", status.dependents.join(", "));
    }

    if !d.config_schema.is_empty() {
        let config = env.config()?;
        let current = config.validate_plugin_settings(name, &d.config_schema);
        println!();
        println!("Settings:");
        for (key, option) in &d.config_schema {
            let value = current
                .get(key)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "(unset)".to_string());
            println!("  {} = {}    {}", key, value, option.description);
        }
    }

    Ok(())
}

fn enable_plugin(env: &PluginEnv, name: &str) -> Result<()> {
    let catalog = env.catalog();
    let Some(descriptor) = catalog.registry().get_plugin_metadata(name) else {
        bail!("Plugin '{}' is not installed", name);
    };

    let mut config = env.config()?;
    config.enable_plugin(name);
    config.save_config()?;
    println!("Enabled plugin: {}", name);

    let disabled: Vec<&str> = descriptor
        .dependencies
        .iter()
        .filter(|dep| !config.is_plugin_enabled(dep))
        .map(String::as_str)
        .collect();
    if !disabled.is_empty() {
        println!("Note: dependencies not enabled: {}", disabled.join(", "));
    }
    Ok(())
}

fn disable_plugin(env: &PluginEnv, name: &str) -> Result<()> {
    let mut config = env.config()?;
    config.disable_plugin(name);
    config.save_config()?;
    println!("Disabled plugin: {}", name);
    Ok(())
}

fn set_setting(env: &PluginEnv, name: &str, key: &str, raw: &str) -> Result<()> {
    let mut value = parse_value(raw);

    let catalog = env.catalog();
    match catalog.registry().get_plugin_metadata(name) {
        Some(descriptor) if !descriptor.config_schema.is_empty() => {
            let Some(option) = descriptor.config_schema.get(key) else {
                bail!("Plugin '{}' has no setting '{}'", name, key);
            };
            if let Some(kind) = option.kind {
                let Some(coerced) = coerce_setting(&value, kind) else {
                    bail!("Setting '{}' expects {}, got '{}'", key, kind, raw);
                };
                value = coerced;
            }
        }
        Some(_) => {}
        None => tracing::warn!(plugin = %name, "Storing setting for unknown plugin"),
    }

    let mut config = env.config()?;
    println!("{}.{} = {}", name, key, value);
    config.set_plugin_setting(name, key, value);
    config.save_config()?;
    Ok(())
}

/// Parse a command-line value as TOML, falling back to a plain string
fn parse_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("value = {raw}"))
        .ok()
        .and_then(|mut table| table.remove("value"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_env(dir: &TempDir) -> PluginEnv {
        PluginEnv {
            config_path: dir.path().join("plugins.toml"),
            settings: ManagerConfig {
                discovery_paths: Vec::new(),
                ..ManagerConfig::default()
            },
        }
    }

    #[test]
    fn test_plugin_args_parsing() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(subcommand)]
            cmd: PluginCommands,
        }

        let cli = TestCli::parse_from(["test", "list"]);
        assert!(matches!(cli.cmd, PluginCommands::List { json: false }));

        let cli = TestCli::parse_from(["test", "list", "--json"]);
        assert!(matches!(cli.cmd, PluginCommands::List { json: true }));

        let cli = TestCli::parse_from(["test", "enable", "heartbeat"]);
        assert!(matches!(cli.cmd, PluginCommands::Enable { name } if name == "heartbeat"));

        let cli = TestCli::parse_from(["test", "set", "heartbeat", "interval_ms", "250"]);
        assert!(matches!(
            cli.cmd,
            PluginCommands::Set { name, key, value }
                if name == "heartbeat" && key == "interval_ms" && value == "250"
        ));
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("250"), toml::Value::Integer(250));
        assert_eq!(parse_value("true"), toml::Value::Boolean(true));
        assert_eq!(parse_value("\"quoted\""), toml::Value::String("quoted".into()));
        assert_eq!(parse_value("bare words"), toml::Value::String("bare words".into()));
    }

    #[test]
    fn test_builtins_enabled_by_default() {
        let dir = TempDir::new().unwrap();
        let statuses = effective_status(&test_env(&dir)).unwrap();
        let names: Vec<&str> = statuses.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["heartbeat", "tick-logger"]);
        assert!(statuses.iter().all(|s| s.enabled));
    }

    #[test]
    fn test_disable_persists() {
        let dir = TempDir::new().unwrap();
        let env = test_env(&dir);

        disable_plugin(&env, "tick-logger").unwrap();
        let statuses = effective_status(&env).unwrap();
        let logger = statuses.iter().find(|s| s.name == "tick-logger").unwrap();
        assert!(!logger.enabled);

        enable_plugin(&env, "tick-logger").unwrap();
        assert!(env.config().unwrap().is_plugin_enabled("tick-logger"));
    }

    #[test]
    fn test_enable_unknown_plugin_fails() {
        let dir = TempDir::new().unwrap();
        let env = test_env(&dir);
        assert!(enable_plugin(&env, "ghost").is_err());
        assert!(!env.config_path.exists());
    }

    #[test]
    fn test_set_setting_coerces_to_schema() {
        let dir = TempDir::new().unwrap();
        let env = test_env(&dir);

        set_setting(&env, "heartbeat", "interval_ms", "\"250\"").unwrap();
        let stored = env.config().unwrap().get_plugin_settings("heartbeat");
        assert_eq!(stored.get("interval_ms"), Some(&toml::Value::Integer(250)));

        assert!(set_setting(&env, "heartbeat", "interval_ms", "fast").is_err());
        assert!(set_setting(&env, "heartbeat", "nope", "1").is_err());
    }
}
