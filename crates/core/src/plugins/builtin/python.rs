//! Analyzer for crashes reported by the Python exception hook.
//!
//! The hook already writes `uuid` and usually `duphash`; both are taken as-is.

use std::path::Path;

use crate::dump::{DumpDir, OpenFlags};
use crate::fingerprint::{normalize_package, sha1_hex};
use crate::model::items;
use crate::plugins::{Analyzer, Plugin, PluginError};

#[derive(Debug, Clone, Copy, Default)]
pub struct PythonAnalyzer;

fn stored_or_hashed(dump_dir: &Path, item: &str) -> Result<String, PluginError> {
    let dir = DumpDir::open(dump_dir, OpenFlags::default())?;
    if let Some(value) = dir.load_text_opt(item)? {
        let value = value.trim();
        if !value.is_empty() {
            return Ok(value.to_string());
        }
    }

    let package = dir.load_text(items::PACKAGE)?;
    let executable = dir.load_text(items::EXECUTABLE)?;
    let backtrace = dir.load_text_opt(items::BACKTRACE)?.unwrap_or_default();
    Ok(sha1_hex(&format!(
        "{}{}{}",
        normalize_package(package.trim()),
        executable.trim(),
        backtrace
    )))
}

impl Plugin for PythonAnalyzer {}

impl Analyzer for PythonAnalyzer {
    fn local_uuid(&self, dump_dir: &Path) -> Result<String, PluginError> {
        stored_or_hashed(dump_dir, items::UUID)
    }

    fn global_uuid(&self, dump_dir: &Path) -> Result<String, PluginError> {
        stored_or_hashed(dump_dir, items::DUPHASH)
    }

    /// The exception hook captured the traceback already.
    fn create_report(&self, _dump_dir: &Path, _force: bool) -> Result<(), PluginError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_stored_uuid_and_falls_back_to_hash() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("pyhook-1");
        {
            let dir = DumpDir::create(&path, 500).expect("create");
            dir.save_text(items::UUID, "1234abcd").expect("uuid");
            dir.save_text(items::PACKAGE, "python3-3.11.4-1.fc38").expect("package");
            dir.save_text(items::EXECUTABLE, "/usr/bin/script.py").expect("exe");
            dir.save_text(items::BACKTRACE, "Traceback (most recent call last):\n").expect("bt");
        }

        let analyzer = PythonAnalyzer;
        assert_eq!(analyzer.local_uuid(&path).expect("local"), "1234abcd");
        let global = analyzer.global_uuid(&path).expect("global");
        assert_eq!(global.len(), 40);
        assert_eq!(
            global,
            sha1_hex("python3-3.11/usr/bin/script.pyTraceback (most recent call last):\n")
        );
    }
}
