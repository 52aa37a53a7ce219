use std::fs;

use anyhow::{Context, Result};
use crashvault_core::db::{CrashLedger, StoreLayout};
use crashvault_core::plugins::settings::save_settings_file;
use crashvault_core::plugins::{PluginInfo, PluginSettings};
use serde::Serialize;

use crate::commands::{layout_for, load_policy, open_pipeline, print_dir_status, print_json};

fn default_policy(layout: &StoreLayout) -> String {
    format!(
        r#"# crashvault policy
[Common]
BlackList = nspluginwrapper, valgrind, strace
EnabledPlugins = CCpp, Python, Logger, RunApp, SQLite3
Database = SQLite3
EnableOpenGPG = no
MaxCrashReportsSize = 1000
DumpLocation = "{dump}"
PluginsConfDir = "{plugins}"

[AnalyzerActionsAndReporters]
CCpp = Logger
Python = Logger
"#,
        dump = layout.dump_location.display(),
        plugins = layout.plugins_conf_dir.display(),
    )
}

fn write_plugin_conf(layout: &StoreLayout, name: &str, entries: &[(&str, String)]) -> Result<()> {
    let path = layout.plugins_conf_dir.join(format!("{name}.conf"));
    if path.exists() {
        return Ok(());
    }
    let settings: PluginSettings =
        entries.iter().map(|(key, value)| (key.to_string(), value.clone())).collect();
    save_settings_file(&path, &settings)
        .with_context(|| format!("Failed to write plugin settings: {}", path.display()))
}

/// Initialize a crash store at `root`.
pub fn init_command(root: &str) -> Result<()> {
    let layout = layout_for(root)?;

    for (label, dir) in [
        ("plugin conf dir", &layout.plugins_conf_dir),
        ("dump location", &layout.dump_location),
        ("debuginfo cache", &layout.cache_dir),
    ] {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {label}: {}", dir.display()))?;
    }

    if !layout.config_path.exists() {
        fs::write(&layout.config_path, default_policy(&layout)).with_context(|| {
            format!("Failed to write policy config: {}", layout.config_path.display())
        })?;
    }
    write_plugin_conf(&layout, "SQLite3", &[("DBPath", layout.db_path.display().to_string())])?;
    write_plugin_conf(&layout, "Logger", &[("LogPath", layout.log_path.display().to_string())])?;
    write_plugin_conf(
        &layout,
        "CCpp",
        &[("DebugInfoCacheDir", layout.cache_dir.display().to_string())],
    )?;

    // Create the ledger now so later commands can rely on it.
    CrashLedger::open(&layout.db_path).with_context(|| {
        format!("Failed to initialize crash ledger at {}", layout.db_path.display())
    })?;

    println!("Initialized crash store:");
    println!("  Root: {}", layout.root.display());
    println!("  Policy: {}", layout.config_path.display());
    println!("  Dump location: {}", layout.dump_location.display());
    println!("  Ledger: {}", layout.db_path.display());
    Ok(())
}

/// Show where the store keeps its state.
pub fn status_command(root: &str) -> Result<()> {
    let layout = layout_for(root)?;
    println!("crashvault v{}", crashvault_core::version());
    println!("Root: {}", layout.root.display());
    let policy_state = if layout.config_path.is_file() { "OK" } else { "MISSING" };
    println!("Policy: {} ({policy_state})", layout.config_path.display());
    println!("Directories:");
    print_dir_status("Plugin conf dir", &layout.plugins_conf_dir);
    print_dir_status("Dump location", &layout.dump_location);
    print_dir_status("Debuginfo cache", &layout.cache_dir);
    Ok(())
}

/// Print the effective policy.
pub fn policy_command(root: &str, json: bool) -> Result<()> {
    let layout = layout_for(root)?;
    let config = load_policy(&layout)?;
    if json {
        return print_json(&config, "policy");
    }

    println!("Database: {}", config.database);
    println!("Dump location: {}", config.dump_location.display());
    println!("Max crash reports size: {} MB", config.max_crash_reports_size_mb);
    println!("Enabled plugins: {}", config.enabled_plugins.join(", "));
    let blacklist: Vec<&str> = config.blacklist.iter().map(String::as_str).collect();
    println!("Blacklist: {}", blacklist.join(", "));
    println!("Signature check: {}", if config.open_gpg_check { "yes" } else { "no" });
    println!("Reporters:");
    for (analyzer, calls) in &config.analyzer_actions_and_reporters {
        let names: Vec<&str> = calls.iter().map(|call| call.name.as_str()).collect();
        println!("  {analyzer}: {}", names.join(", "));
    }
    Ok(())
}

#[derive(Serialize)]
struct PluginListing<'a> {
    plugins: &'a [PluginInfo],
}

/// List the plugin catalog with registration state.
pub fn plugins_command(root: &str, json: bool) -> Result<()> {
    let layout = layout_for(root)?;
    let pipeline = open_pipeline(&layout, None)?;
    let infos = pipeline.registry().plugin_infos();
    if json {
        return print_json(&PluginListing { plugins: &infos }, "plugins");
    }

    println!("Plugins ({}):", infos.len());
    for info in infos {
        let capability = info.capability.map(|c| c.as_str()).unwrap_or("?");
        let state = if info.enabled { "enabled" } else { "disabled" };
        println!(
            "  - {} [{capability}, {state}] v{} - {}",
            info.name, info.version, info.description
        );
    }
    Ok(())
}
