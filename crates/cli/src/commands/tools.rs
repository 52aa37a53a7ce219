use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use crashvault_core::cache::trim_cache;
use crashvault_core::rating::rate_backtrace;

use crate::commands::print_json;

/// Print the 0-4 usefulness rating of a backtrace file.
pub fn rate_command(file: &str) -> Result<()> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read backtrace from {file}"))?;
    println!("{}", rate_backtrace(&text));
    Ok(())
}

/// Evict debuginfo cache files until the cache is below `max_mb`.
pub fn trim_cache_command(dir: &str, max_mb: u64, json: bool) -> Result<()> {
    let report = trim_cache(Path::new(dir), max_mb)
        .with_context(|| format!("Failed to trim cache at {dir}"))?;
    if json {
        return print_json(&report, "trim report");
    }
    println!("Removed {} file(s):", report.removed.len());
    for path in &report.removed {
        println!("  - {}", path.display());
    }
    println!("Remaining: {} bytes", report.remaining_bytes);
    Ok(())
}
