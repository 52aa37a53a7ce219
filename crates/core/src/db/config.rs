use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::plugins::settings::{parse_line_keeping_quotes, setting_bool};

/// Default SQLite database plugin name.
pub const DEFAULT_DATABASE: &str = "SQLite3";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read policy config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: malformed section header '{text}'")]
    MalformedSection { line: usize, text: String },

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// One entry of a plugin list: `Name` or `Name(args)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCall {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub args: String,
}

impl PluginCall {
    pub fn new(name: impl Into<String>, args: impl Into<String>) -> Self {
        Self { name: name.into(), args: args.into() }
    }
}

/// Global policy, passed explicitly to the pipeline.
///
/// Text format (`[Common]` keys and `[AnalyzerActionsAndReporters]` mappings):
///
/// ```text
/// [Common]
/// BlackList = nspluginwrapper, valgrind
/// EnabledPlugins = Logger, CCpp
/// Database = SQLite3
/// EnableOpenGPG = no
///
/// [AnalyzerActionsAndReporters]
/// CCpp = Logger, RunApp("date", date)
/// CCpp:bash = Logger
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Package names whose crashes are dropped at ingest.
    pub blacklist: BTreeSet<String>,
    pub enabled_plugins: Vec<String>,
    /// Name of the Database plugin holding the ledger.
    pub database: String,
    pub open_gpg_check: bool,
    pub open_gpg_public_keys: Vec<String>,
    /// Upper bound for the whole dump location, in megabytes.
    pub max_crash_reports_size_mb: u64,
    pub dump_location: PathBuf,
    pub plugins_conf_dir: PathBuf,
    /// Actions run right after a new crash is stored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions_and_reporters: Vec<PluginCall>,
    /// `Analyzer` or `Analyzer:package` -> plugins run when reporting.
    #[serde(default)]
    pub analyzer_actions_and_reporters: BTreeMap<String, Vec<PluginCall>>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            blacklist: BTreeSet::new(),
            enabled_plugins: Vec::new(),
            database: DEFAULT_DATABASE.to_string(),
            open_gpg_check: false,
            open_gpg_public_keys: Vec::new(),
            max_crash_reports_size_mb: 1000,
            dump_location: PathBuf::from("/var/spool/abrt"),
            plugins_conf_dir: PathBuf::from("/etc/abrt/plugins"),
            actions_and_reporters: Vec::new(),
            analyzer_actions_and_reporters: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Common,
    AnalyzerActionsAndReporters,
    Ignored,
}

impl PolicyConfig {
    /// Parse policy text on top of the defaults.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Self::parse_with_base(text, Self::default())
    }

    /// Parse policy text, overriding values of `base`.
    pub fn parse_with_base(text: &str, base: Self) -> Result<Self, ConfigError> {
        let mut config = base;
        let mut section = Section::Common;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.starts_with('[') {
                let name = line
                    .strip_prefix('[')
                    .and_then(|rest| rest.strip_suffix(']'))
                    .ok_or_else(|| ConfigError::MalformedSection {
                        line: index + 1,
                        text: line.to_string(),
                    })?;
                section = match name.trim() {
                    "Common" => Section::Common,
                    "AnalyzerActionsAndReporters" => Section::AnalyzerActionsAndReporters,
                    other => {
                        warn!(section = other, "ignoring unknown policy section");
                        Section::Ignored
                    }
                };
                continue;
            }

            // Quotes survive so plugin arguments keep their quoted commas.
            let Some((key, value)) = parse_line_keeping_quotes(line) else {
                continue;
            };
            match section {
                Section::Common => config.apply_common(&key, &value)?,
                Section::AnalyzerActionsAndReporters => {
                    config.analyzer_actions_and_reporters.insert(key, parse_plugin_list(&value));
                }
                Section::Ignored => {}
            }
        }
        Ok(config)
    }

    /// Load a policy file over `base`; a missing file yields `base` unchanged.
    pub fn load(path: &Path, base: Self) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse_with_base(&text, base),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(base),
            Err(source) => Err(ConfigError::Io { path: path.to_path_buf(), source }),
        }
    }

    fn apply_common(&mut self, key: &str, quoted: &str) -> Result<(), ConfigError> {
        if key == "ActionsAndReporters" {
            self.actions_and_reporters = parse_plugin_list(quoted);
            return Ok(());
        }
        let unquoted = quoted.replace('"', "");
        let value = unquoted.as_str();
        match key {
            "BlackList" => self.blacklist = split_list(value).collect(),
            "EnabledPlugins" => self.enabled_plugins = split_list(value).collect(),
            "Database" => self.database = value.to_string(),
            "EnableOpenGPG" | "OpenGPGCheck" => self.open_gpg_check = setting_bool(value),
            "OpenGPGPublicKeys" => self.open_gpg_public_keys = split_list(value).collect(),
            "MaxCrashReportsSize" => {
                self.max_crash_reports_size_mb = value.parse().map_err(|_| {
                    ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() }
                })?;
            }
            "DumpLocation" => self.dump_location = PathBuf::from(value),
            "PluginsConfDir" => self.plugins_conf_dir = PathBuf::from(value),
            other => warn!(key = other, "ignoring unknown policy key"),
        }
        Ok(())
    }

    pub fn is_blacklisted(&self, package_name: &str) -> bool {
        self.blacklist.contains(package_name)
    }

    /// Plugins configured for `analyzer`; an `analyzer:package` entry wins.
    pub fn reporters_for(&self, analyzer: &str, package_name: &str) -> &[PluginCall] {
        let specific = format!("{analyzer}:{package_name}");
        self.analyzer_actions_and_reporters
            .get(&specific)
            .or_else(|| self.analyzer_actions_and_reporters.get(analyzer))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every plugin name the policy refers to, so they can be activated.
    pub fn referenced_plugins(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.enabled_plugins.iter().cloned().collect();
        names.insert(self.database.clone());
        names.extend(self.actions_and_reporters.iter().map(|call| call.name.clone()));
        for (key, calls) in &self.analyzer_actions_and_reporters {
            let analyzer = key.split(':').next().unwrap_or(key);
            names.insert(analyzer.to_string());
            names.extend(calls.iter().map(|call| call.name.clone()));
        }
        names
    }
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value.split(',').map(str::trim).filter(|item| !item.is_empty()).map(str::to_string)
}

/// Parse `A, B(x, y), C` into plugin calls. Commas inside parentheses belong
/// to the arguments; quotes inside the arguments are passed through.
pub fn parse_plugin_list(value: &str) -> Vec<PluginCall> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth: u32 = 0;
    let mut in_quote = false;
    for c in value.chars() {
        if in_quote || c == '"' {
            if c == '"' {
                in_quote = !in_quote;
            }
            current.push(c);
            continue;
        }
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => items.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    items.push(current);

    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| match item.find('(') {
            Some(open) => {
                let args = item[open + 1..].strip_suffix(')').unwrap_or(&item[open + 1..]);
                PluginCall::new(item[..open].trim(), args.trim())
            }
            None => PluginCall::new(item, ""),
        })
        .collect()
}
