use std::fs;
use std::path::PathBuf;

use crate::db::{CrashLedger, DedupRow, InsertOutcome, NewCrashEntry};
use crate::plugins::{Database, Plugin, PluginError, PluginSettings};

const DEFAULT_DB_PATH: &str = "/var/cache/abrt/abrt-db";

/// Database plugin backed by `CrashLedger`.
///
/// Every call opens its own connection and closes it on return.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    db_path: PathBuf,
}

impl Default for SqliteDatabase {
    fn default() -> Self {
        Self { db_path: PathBuf::from(DEFAULT_DB_PATH) }
    }
}

impl SqliteDatabase {
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self { db_path: db_path.into() }
    }

    fn connect(&self) -> Result<CrashLedger, PluginError> {
        if let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(CrashLedger::open(&self.db_path)?)
    }
}

impl Plugin for SqliteDatabase {
    fn apply_settings(&mut self, settings: &PluginSettings) {
        if let Some(path) = settings.get("DBPath") {
            self.db_path = PathBuf::from(path);
        }
    }
}

impl Database for SqliteDatabase {
    fn insert(&self, entry: &NewCrashEntry) -> Result<InsertOutcome, PluginError> {
        Ok(self.connect()?.insert_or_bump(entry)?)
    }

    fn get(&self, uuid: &str, uid: u32) -> Result<Option<DedupRow>, PluginError> {
        Ok(self.connect()?.get(uuid, uid)?)
    }

    fn list(&self, uid: Option<u32>) -> Result<Vec<DedupRow>, PluginError> {
        Ok(self.connect()?.list(uid)?)
    }

    fn set_reported(&self, uuid: &str, uid: u32, message: &str) -> Result<bool, PluginError> {
        Ok(self.connect()?.set_reported(uuid, uid, message)?)
    }

    fn delete(&self, uuid: &str, uid: u32) -> Result<bool, PluginError> {
        Ok(self.connect()?.delete(uuid, uid)?)
    }
}
