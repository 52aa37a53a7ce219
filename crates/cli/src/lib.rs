use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

pub mod commands;

/// Canonicalize the root path if possible, falling back to the given string
/// relative to the current working directory.
pub fn canonicalize_or_current(root: &str) -> Result<PathBuf> {
    let path = Path::new(root);
    if path == Path::new(".") {
        Ok(env::current_dir().context("Failed to get current directory")?)
    } else {
        // The path may not exist yet (e.g. before `init`).
        match path.canonicalize() {
            Ok(p) => Ok(p),
            Err(_) => {
                let cwd = env::current_dir().context("Failed to get current directory")?;
                Ok(cwd.join(path))
            }
        }
    }
}

/// Split a `name=value` command-line field.
pub fn parse_field(field: &str) -> Result<(String, String)> {
    let (name, value) = field
        .split_once('=')
        .ok_or_else(|| anyhow!("Field '{field}' is not of the form name=value"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("Field '{field}' has an empty name"));
    }
    Ok((name.to_string(), value.to_string()))
}
