use anyhow::{Context, Result};

use crate::db::{PolicyConfig, StoreLayout};

/// Base policy for a store: paths point inside the layout.
pub fn layout_defaults(layout: &StoreLayout) -> PolicyConfig {
    PolicyConfig {
        dump_location: layout.dump_location.clone(),
        plugins_conf_dir: layout.plugins_conf_dir.clone(),
        ..PolicyConfig::default()
    }
}

/// Load the policy file for a given layout. A missing file yields the layout defaults.
pub fn load_policy_config(layout: &StoreLayout) -> Result<PolicyConfig> {
    let config = PolicyConfig::load(&layout.config_path, layout_defaults(layout)).with_context(
        || format!("Failed to load policy config at {}", layout.config_path.display()),
    )?;
    Ok(config)
}
