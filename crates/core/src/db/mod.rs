//! Persistent state: the deduplication ledger, the policy file and the
//! on-disk layout of a store.

pub mod config;
pub mod layout;
pub mod ledger;
pub mod models;
pub mod util;

pub use config::{parse_plugin_list, ConfigError, PluginCall, PolicyConfig, DEFAULT_DATABASE};
pub use layout::StoreLayout;
pub use ledger::{CrashLedger, DbError, DbResult, CURRENT_SCHEMA_VERSION};
pub use models::{DedupRow, InsertDisposition, InsertOutcome, NewCrashEntry};
pub use util::{layout_defaults, load_policy_config};
