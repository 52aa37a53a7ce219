//! Analyzer for native (C/C++) crashes with a core dump.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{self, DEFAULT_CACHE_DIR, DEFAULT_CACHE_MB};
use crate::dump::{DumpDir, OpenFlags};
use crate::fingerprint;
use crate::model::items;
use crate::plugins::settings::setting_bool;
use crate::plugins::{Analyzer, Plugin, PluginError, PluginSettings};
use crate::rating::rate_backtrace;
use crate::services::exec::run_with_timeout;

const DEFAULT_GDB_TIMEOUT_SEC: u64 = 60;
const DEFAULT_UNSTRIP_TIMEOUT_SEC: u64 = 30;
const DEFAULT_INSTALLER: &str = "abrt-debuginfo-install";

#[derive(Debug, Clone)]
pub struct CcppAnalyzer {
    backtrace: bool,
    install_debuginfo: bool,
    cache_dir: PathBuf,
    cache_mb: u64,
    gdb_timeout: Duration,
    unstrip_timeout: Duration,
    installer: String,
}

impl Default for CcppAnalyzer {
    fn default() -> Self {
        Self {
            backtrace: true,
            install_debuginfo: false,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_mb: DEFAULT_CACHE_MB,
            gdb_timeout: Duration::from_secs(DEFAULT_GDB_TIMEOUT_SEC),
            unstrip_timeout: Duration::from_secs(DEFAULT_UNSTRIP_TIMEOUT_SEC),
            installer: DEFAULT_INSTALLER.to_string(),
        }
    }
}

impl CcppAnalyzer {
    /// `eu-unstrip -n` output for the core dump, cached in the `build_ids` item.
    fn build_ids(&self, dump_dir: &Path) -> Result<String, PluginError> {
        {
            let dir = DumpDir::open(dump_dir, OpenFlags::default())?;
            if let Some(cached) = dir.load_text_opt(items::BUILD_IDS)? {
                return Ok(cached);
            }
        }

        let coredump = dump_dir.join(items::COREDUMP);
        let mut command = Command::new("eu-unstrip");
        command.arg(format!("--core={}", coredump.display())).arg("-n");
        let output = run_with_timeout(&mut command, self.unstrip_timeout)?;
        if !output.success() {
            warn!(dir = %dump_dir.display(), "eu-unstrip did not finish cleanly");
        }

        let dir = DumpDir::open(dump_dir, OpenFlags::default())?;
        dir.save_text(items::BUILD_IDS, &output.stdout)?;
        Ok(output.stdout)
    }

    fn install_debuginfo(&self, dump_dir: &Path) -> Result<(), PluginError> {
        let mut command = Command::new(&self.installer);
        command.arg(dump_dir.join(items::COREDUMP)).arg(&self.cache_dir);
        let output = run_with_timeout(&mut command, self.gdb_timeout)?;
        for line in output.stdout.lines() {
            if let Some(missing) = line.strip_prefix("MISSING:") {
                warn!(build_id = missing.trim(), "debuginfo not found");
            }
        }
        Ok(())
    }

    fn run_gdb(&self, dump_dir: &Path, executable: &str) -> Result<String, PluginError> {
        let debug_dir = self.cache_dir.join("usr/lib/debug");
        let mut command = Command::new("gdb");
        command
            .arg("-batch")
            .arg("-ex")
            .arg("set pagination off")
            .arg("-ex")
            .arg(format!("set debug-file-directory /usr/lib/debug:{}", debug_dir.display()))
            .arg("-ex")
            .arg(format!("file {executable}"))
            .arg("-ex")
            .arg(format!("core-file {}", dump_dir.join(items::COREDUMP).display()))
            // The crashing thread first; only that block feeds the global UUID.
            .arg("-ex")
            .arg("backtrace 8")
            .arg("-ex")
            .arg("thread apply all backtrace 3000 full")
            .arg("-ex")
            .arg("info sharedlib");
        let output = run_with_timeout(&mut command, self.gdb_timeout)?;
        Ok(output.stdout)
    }
}

impl Plugin for CcppAnalyzer {
    fn apply_settings(&mut self, settings: &PluginSettings) {
        if let Some(value) = settings.get("Backtrace") {
            self.backtrace = setting_bool(value);
        }
        if let Some(value) = settings.get("InstallDebugInfo") {
            self.install_debuginfo = setting_bool(value);
        }
        if let Some(value) = settings.get("DebugInfoCacheDir") {
            self.cache_dir = PathBuf::from(value);
        }
        if let Some(value) = settings.get("DebugInfoCacheMB").and_then(|v| v.parse().ok()) {
            self.cache_mb = value;
        }
        if let Some(secs) = settings.get("GdbTimeoutSec").and_then(|v| v.parse().ok()) {
            self.gdb_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = settings.get("UnstripTimeoutSec").and_then(|v| v.parse().ok()) {
            self.unstrip_timeout = Duration::from_secs(secs);
        }
        if let Some(value) = settings.get("DebugInfoInstaller") {
            self.installer = value.clone();
        }
    }
}

impl Analyzer for CcppAnalyzer {
    fn local_uuid(&self, dump_dir: &Path) -> Result<String, PluginError> {
        let (package, executable) = {
            let dir = DumpDir::open(dump_dir, OpenFlags::default())?;
            (dir.load_text(items::PACKAGE)?, dir.load_text(items::EXECUTABLE)?)
        };
        let build_ids = self.build_ids(dump_dir)?;
        Ok(fingerprint::local_uuid(package.trim(), executable.trim(), &build_ids))
    }

    fn global_uuid(&self, dump_dir: &Path) -> Result<String, PluginError> {
        let dir = DumpDir::open(dump_dir, OpenFlags::default())?;
        let duphash = dir.load_text_opt(items::DUPHASH)?;
        let package = dir.load_text(items::PACKAGE)?;
        let executable = dir.load_text(items::EXECUTABLE)?;
        let backtrace = dir.load_text_opt(items::BACKTRACE)?.unwrap_or_default();
        Ok(fingerprint::global_uuid(
            duphash.as_deref(),
            package.trim(),
            executable.trim(),
            &backtrace,
        ))
    }

    fn create_report(&self, dump_dir: &Path, force: bool) -> Result<(), PluginError> {
        let executable = {
            let dir = DumpDir::open(dump_dir, OpenFlags::default())?;
            if dir.exists(items::BACKTRACE) && !force {
                debug!(dir = %dump_dir.display(), "backtrace already present");
                return Ok(());
            }
            dir.load_text(items::EXECUTABLE)?
        };
        if !self.backtrace {
            return Ok(());
        }

        if let Err(err) = cache::trim_cache(&self.cache_dir, self.cache_mb) {
            warn!(cache = %self.cache_dir.display(), "can't trim debuginfo cache: {err}");
        }
        if self.install_debuginfo {
            self.install_debuginfo(dump_dir)?;
        }

        let backtrace = self.run_gdb(dump_dir, executable.trim())?;
        let rating = rate_backtrace(&backtrace);
        info!(dir = %dump_dir.display(), rating, "generated backtrace");

        let dir = DumpDir::open(dump_dir, OpenFlags::default())?;
        dir.save_text(items::BACKTRACE, &backtrace)?;
        dir.save_text(items::RATING, &rating.to_string())?;
        Ok(())
    }
}
