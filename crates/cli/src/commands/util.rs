use std::path::Path;

use anyhow::{Context, Result};
use crashvault_core::db::{load_policy_config, PolicyConfig, StoreLayout};
use crashvault_core::services::{
    CrashPipeline, PackageInfo, ProblemService, RpmPackageResolver, StaticPackageResolver,
};
use tracing::debug;

use crate::canonicalize_or_current;

/// Resolve `--root` into a layout.
pub fn layout_for(root: &str) -> Result<StoreLayout> {
    Ok(StoreLayout::new(canonicalize_or_current(root)?))
}

/// Load the policy for a store (delegates to core helper).
pub fn load_policy(layout: &StoreLayout) -> Result<PolicyConfig> {
    load_policy_config(layout)
}

/// Start a pipeline for the store.
///
/// With `package`, every executable is attributed to that package instead of
/// asking rpm; useful on hosts without an rpm database.
pub fn open_pipeline(layout: &StoreLayout, package: Option<&str>) -> Result<CrashPipeline> {
    let config = load_policy(layout)?;
    debug!(root = %layout.root.display(), database = %config.database, "starting pipeline");
    let pipeline = match package {
        Some(nvr) => {
            let resolver = StaticPackageResolver::new().with_fallback(PackageInfo::new(nvr, ""));
            CrashPipeline::bootstrap(config, resolver)
        }
        None => CrashPipeline::bootstrap(config, RpmPackageResolver),
    };
    pipeline.context("Failed to start crash pipeline")
}

pub fn open_problem_service(layout: &StoreLayout) -> Result<ProblemService> {
    Ok(ProblemService::from_config(&load_policy(layout)?))
}

/// Helper to print whether a directory exists.
pub fn print_dir_status(label: &str, path: &Path) {
    let exists = path.is_dir();
    println!("- {label}: {} ({})", if exists { "OK" } else { "MISSING" }, path.display());
}

pub fn print_json<T: serde::Serialize>(value: &T, what: &str) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {what} to JSON"))?;
    println!("{serialized}");
    Ok(())
}
