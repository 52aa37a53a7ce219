//! Capability plugins.
//!
//! A plugin implements exactly one capability (Analyzer, Action, Reporter or
//! Database). Plugins are compiled in: each one is described by a
//! `PluginDescriptor` whose factory builds a fresh instance, and the
//! `PluginRegistry` drives the Unloaded -> Loaded -> Registered lifecycle.

pub mod builtin;
pub mod registry;
pub mod settings;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;
use crate::db::{DbError, DedupRow, InsertOutcome, NewCrashEntry};
use crate::dump::DumpError;
use crate::model::CrashRecord;
use crate::services::exec::ExecError;

pub use registry::{PluginInfo, PluginRegistry, PluginState, RegistryError};
pub use settings::PluginSettings;

/// Compatibility tag every descriptor must carry.
pub const PLUGIN_MAGIC: u32 = 6;

/// Capability implemented by a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Analyzer,
    Action,
    Reporter,
    Database,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Analyzer => "Analyzer",
            Capability::Action => "Action",
            Capability::Reporter => "Reporter",
            Capability::Database => "Database",
        }
    }

    /// Numeric tag as stored in descriptors.
    pub fn to_i32(self) -> i32 {
        match self {
            Capability::Analyzer => 0,
            Capability::Action => 1,
            Capability::Reporter => 2,
            Capability::Database => 3,
        }
    }

    /// `None` for tags outside the known range.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Capability::Analyzer),
            1 => Some(Capability::Action),
            2 => Some(Capability::Reporter),
            3 => Some(Capability::Database),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a plugin instance.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub fn failed(message: impl Into<String>) -> Self {
        PluginError::Failed(message.into())
    }
}

/// Lifecycle hooks shared by every capability.
pub trait Plugin: Send {
    fn init(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn deinit(&mut self) {}

    fn apply_settings(&mut self, settings: &PluginSettings) {
        let _ = settings;
    }
}

/// Computes fingerprints and derived data for one kind of crash.
///
/// Implementations receive the dump directory path and take the lock only for
/// as long as they read or write items, never while running subprocesses.
pub trait Analyzer: Plugin {
    fn local_uuid(&self, dump_dir: &Path) -> Result<String, PluginError>;
    fn global_uuid(&self, dump_dir: &Path) -> Result<String, PluginError>;
    /// Generate report data (backtrace, rating). Must not regenerate an
    /// existing backtrace unless `force` is set.
    fn create_report(&self, dump_dir: &Path, force: bool) -> Result<(), PluginError>;
}

/// Runs a side effect against a dump directory.
pub trait Action: Plugin {
    fn run(&self, dump_dir: &Path, args: &str) -> Result<(), PluginError>;
}

/// Sends a finished report somewhere; returns a human-readable result message.
pub trait Reporter: Plugin {
    fn report(&self, record: &CrashRecord, args: &str) -> Result<String, PluginError>;
}

/// Deduplication ledger. Every call is one self-contained session.
pub trait Database: Plugin {
    fn insert(&self, entry: &NewCrashEntry) -> Result<InsertOutcome, PluginError>;
    fn get(&self, uuid: &str, uid: u32) -> Result<Option<DedupRow>, PluginError>;
    /// Rows of `uid`, or every row when `uid` is `None`.
    fn list(&self, uid: Option<u32>) -> Result<Vec<DedupRow>, PluginError>;
    /// Returns whether a row was updated.
    fn set_reported(&self, uuid: &str, uid: u32, message: &str) -> Result<bool, PluginError>;
    /// Returns whether a row was deleted.
    fn delete(&self, uuid: &str, uid: u32) -> Result<bool, PluginError>;
}

/// A live capability object.
pub enum PluginInstance {
    Analyzer(Box<dyn Analyzer>),
    Action(Box<dyn Action>),
    Reporter(Box<dyn Reporter>),
    Database(Box<dyn Database>),
}

impl PluginInstance {
    pub fn capability(&self) -> Capability {
        match self {
            PluginInstance::Analyzer(_) => Capability::Analyzer,
            PluginInstance::Action(_) => Capability::Action,
            PluginInstance::Reporter(_) => Capability::Reporter,
            PluginInstance::Database(_) => Capability::Database,
        }
    }

    fn init(&mut self) -> Result<(), PluginError> {
        match self {
            PluginInstance::Analyzer(p) => p.init(),
            PluginInstance::Action(p) => p.init(),
            PluginInstance::Reporter(p) => p.init(),
            PluginInstance::Database(p) => p.init(),
        }
    }

    fn deinit(&mut self) {
        match self {
            PluginInstance::Analyzer(p) => p.deinit(),
            PluginInstance::Action(p) => p.deinit(),
            PluginInstance::Reporter(p) => p.deinit(),
            PluginInstance::Database(p) => p.deinit(),
        }
    }

    fn apply_settings(&mut self, settings: &PluginSettings) {
        match self {
            PluginInstance::Analyzer(p) => p.apply_settings(settings),
            PluginInstance::Action(p) => p.apply_settings(settings),
            PluginInstance::Reporter(p) => p.apply_settings(settings),
            PluginInstance::Database(p) => p.apply_settings(settings),
        }
    }
}

/// Builds a fresh plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> PluginInstance + Send + Sync>;

/// Static description of a plugin, as found in the catalog.
#[derive(Clone)]
pub struct PluginDescriptor {
    /// Raw capability tag; validated when the plugin is loaded.
    pub capability: i32,
    pub name: String,
    pub version: String,
    pub magic_number: u32,
    pub description: String,
    pub contact: String,
    pub homepage: String,
    pub factory: PluginFactory,
}

impl PluginDescriptor {
    /// Descriptor with the current magic number and empty metadata.
    pub fn new(
        capability: Capability,
        name: impl Into<String>,
        factory: impl Fn() -> PluginInstance + Send + Sync + 'static,
    ) -> Self {
        Self {
            capability: capability.to_i32(),
            name: name.into(),
            version: "0.1.0".to_string(),
            magic_number: PLUGIN_MAGIC,
            description: String::new(),
            contact: String::new(),
            homepage: String::new(),
            factory: Arc::new(factory),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_magic(mut self, magic_number: u32) -> Self {
        self.magic_number = magic_number;
        self
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("capability", &self.capability)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("magic_number", &self.magic_number)
            .finish_non_exhaustive()
    }
}
