use std::path::{Path, PathBuf};

/// Logical layout of a crash store on disk.
///
/// This is derived from a chosen root path. It does *not* perform any IO itself.
/// The CLI is responsible for creating directories and files based on it.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    /// Root directory of the store.
    pub root: PathBuf,
    /// Policy file (`crashvault.conf`).
    pub config_path: PathBuf,
    /// Per-plugin settings files (`plugins/Name.conf`).
    pub plugins_conf_dir: PathBuf,
    /// Dump location holding one directory per crash.
    pub dump_location: PathBuf,
    /// Deduplication ledger used by the SQLite3 plugin.
    pub db_path: PathBuf,
    /// Debuginfo cache trimmed before backtrace generation.
    pub cache_dir: PathBuf,
    /// Default Logger reporter output.
    pub log_path: PathBuf,
}

impl StoreLayout {
    /// Compute the default layout for a store rooted at `root`.
    ///
    /// This does *not* touch the filesystem.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            config_path: root.join("crashvault.conf"),
            plugins_conf_dir: root.join("plugins"),
            dump_location: root.join("spool"),
            db_path: root.join("crashvault.db"),
            cache_dir: root.join("debuginfo-cache"),
            log_path: root.join("crashes.log"),
            root,
        }
    }

    /// Path of one dump directory inside the dump location.
    pub fn dump_dir(&self, name: &str) -> PathBuf {
        self.dump_location.join(name)
    }
}
