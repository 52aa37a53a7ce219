//! Crash workflow: ingest, dedup, report assembly and multi-reporter dispatch.
//!
//! The pipeline owns the plugin registry and the policy. Directory locks are
//! taken only around item reads and writes; analyzers, actions and reporters
//! run with the directory unlocked.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::db::{DedupRow, InsertDisposition, NewCrashEntry, PluginCall, PolicyConfig};
use crate::dump::{DumpDir, DumpError, OpenFlags, PRIVILEGED_UID};
use crate::model::{items, report_items, CrashItem, CrashRecord, DEFAULT_REPRODUCE};
use crate::plugins::settings::{load_settings_file, setting_bool};
use crate::plugins::{Capability, Database, PluginError, PluginRegistry, RegistryError};
use crate::wire::{self, WireError};

use super::packages::{
    package_name_from_nvr, PackageError, PackageInfo, PackageResolver, RpmSignatureVerifier,
    SignatureVerifier,
};

/// Items copied into a report as read-only text.
const REQUIRED_REPORT_ITEMS: [&str; 6] = [
    items::ARCHITECTURE,
    items::KERNEL,
    items::PACKAGE,
    items::COMPONENT,
    items::RELEASE,
    items::EXECUTABLE,
];

/// Directory items that never end up in a report.
const SKIPPED_REPORT_ITEMS: [&str; 4] =
    [items::UID, items::ANALYZER, items::TIME, items::DESCRIPTION];

/// Items a report must carry before it can be dispatched.
const CHECKED_REPORT_ITEMS: [&str; 5] = [
    report_items::ANALYZER,
    report_items::UID,
    report_items::LOCAL_UUID,
    items::EXECUTABLE,
    items::PACKAGE,
];

/// Coarse classification of pipeline failures for front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Busy,
    NotFound,
    Fatal,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("crash {uuid} of uid {uid} is not in database")]
    NotInDatabase { uuid: String, uid: u32 },

    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("plugin '{plugin}' failed: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("corrupted dump directory {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("invalid correlation token: {0}")]
    InvalidToken(String),

    #[error("corrupted report: missing {0}")]
    IncompleteReport(String),

    #[error("analyzer produced an empty uuid for {0}")]
    EmptyUuid(PathBuf),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotInDatabase { .. } => ErrorKind::NotFound,
            PipelineError::Dump(err)
            | PipelineError::Plugin { source: PluginError::Dump(err), .. } => dump_error_kind(err),
            PipelineError::Registry(
                RegistryError::NotFound(_)
                | RegistryError::NotLoaded(_)
                | RegistryError::NotRegistered(_),
            ) => ErrorKind::NotFound,
            _ => ErrorKind::Fatal,
        }
    }

    fn plugin(plugin: &str, source: PluginError) -> Self {
        PipelineError::Plugin { plugin: plugin.to_string(), source }
    }
}

fn dump_error_kind(err: &DumpError) -> ErrorKind {
    match err {
        DumpError::Busy(_) => ErrorKind::Busy,
        DumpError::NotFound(_) | DumpError::MissingItem { .. } => ErrorKind::NotFound,
        _ => ErrorKind::Fatal,
    }
}

/// Why ingestion dropped a crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    UnknownPackage { executable: String },
    Blacklisted { package: String },
    SignatureMismatch { package: String },
}

/// One crash as shown to front ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashSummary {
    pub uuid: String,
    pub uid: u32,
    pub count: u32,
    pub reported: bool,
    pub message: String,
    pub time: i64,
    pub dump_dir: String,
    pub package: String,
    pub executable: String,
    pub description: String,
}

impl CrashSummary {
    fn from_row(row: &DedupRow) -> Self {
        Self {
            uuid: row.uuid.clone(),
            uid: row.uid,
            count: row.count,
            reported: row.reported,
            message: row.message.clone(),
            time: row.time,
            dump_dir: row.dump_dir.clone(),
            package: String::new(),
            executable: String::new(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub summary: CrashSummary,
    pub disposition: InsertDisposition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Stored(IngestReport),
    Rejected(RejectReason),
}

/// Identifies the crash a built report belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportToken {
    pub analyzer: String,
    pub uid: u32,
    pub uuid: String,
}

impl ReportToken {
    /// Wire encoding of a record holding the three `_MW*` system items.
    pub fn encode(&self) -> String {
        let mut record = CrashRecord::new();
        record.insert(report_items::ANALYZER, CrashItem::system(self.analyzer.as_str()));
        record.insert(report_items::UID, CrashItem::system(self.uid.to_string()));
        record.insert(report_items::LOCAL_UUID, CrashItem::system(self.uuid.as_str()));
        wire::encode_record(&record)
    }

    pub fn decode(token: &str) -> Result<Self, PipelineError> {
        let record = wire::decode_record(token.as_bytes())
            .map_err(|err: WireError| PipelineError::InvalidToken(err.to_string()))?;
        let field = |name: &str| {
            record
                .content(name)
                .map(str::to_string)
                .ok_or_else(|| PipelineError::InvalidToken(format!("missing {name}")))
        };
        let uid = field(report_items::UID)?
            .trim()
            .parse()
            .map_err(|_| PipelineError::InvalidToken("uid is not a number".into()))?;
        Ok(Self {
            analyzer: field(report_items::ANALYZER)?,
            uid,
            uuid: field(report_items::LOCAL_UUID)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltReport {
    pub record: CrashRecord,
    /// Opaque correlation token to hand back to `dispatch`.
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReporterOutcome {
    pub reporter: String,
    pub ok: bool,
    pub message: String,
}

/// Aggregate result of sending one report to every configured reporter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub dispatched: usize,
    pub failed: usize,
    pub results: Vec<ReporterOutcome>,
}

/// Verify a report carries everything `dispatch` relies on.
pub fn check_report(record: &CrashRecord) -> Result<(), PipelineError> {
    match CHECKED_REPORT_ITEMS.iter().find(|name| !record.contains(name)) {
        Some(missing) => Err(PipelineError::IncompleteReport((*missing).to_string())),
        None => Ok(()),
    }
}

pub struct CrashPipeline {
    config: PolicyConfig,
    registry: PluginRegistry,
    packages: Box<dyn PackageResolver>,
    signatures: Box<dyn SignatureVerifier>,
}

impl CrashPipeline {
    pub fn new(
        config: PolicyConfig,
        registry: PluginRegistry,
        packages: impl PackageResolver + 'static,
    ) -> Self {
        Self {
            config,
            registry,
            packages: Box::new(packages),
            signatures: Box::new(RpmSignatureVerifier),
        }
    }

    pub fn with_signature_verifier(mut self, verifier: impl SignatureVerifier + 'static) -> Self {
        self.signatures = Box::new(verifier);
        self
    }

    /// Pipeline over the built-in catalog with every plugin the policy needs
    /// registered. Only a failing database plugin is fatal.
    pub fn bootstrap(
        config: PolicyConfig,
        packages: impl PackageResolver + 'static,
    ) -> Result<Self, PipelineError> {
        let mut registry = PluginRegistry::with_builtins(&config.plugins_conf_dir);
        registry.activate(&config.database)?;

        let mut wanted = config.referenced_plugins();
        for name in registry.catalog_names() {
            let path = registry.settings_path(&name);
            let enabled = load_settings_file(&path)
                .ok()
                .and_then(|settings| settings.get("Enabled").map(|value| setting_bool(value)))
                .unwrap_or(false);
            if enabled {
                wanted.insert(name);
            }
        }
        for name in &wanted {
            if let Err(err) = registry.activate(name) {
                warn!(plugin = %name, "can't activate plugin: {err}");
            }
        }

        Ok(Self::new(config, registry, packages))
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    fn database(&self) -> Result<&dyn Database, PipelineError> {
        Ok(self.registry.database(&self.config.database)?)
    }

    /// Analyze a freshly captured dump directory and record it in the ledger.
    pub fn ingest(&self, dump_dir: &Path) -> Result<IngestOutcome, PipelineError> {
        let (executable, analyzer_name, uid, time) = {
            let dir = DumpDir::open(dump_dir, OpenFlags::default())?;
            let executable = dir.load_text(items::EXECUTABLE)?.trim().to_string();
            let analyzer = dir.load_text(items::ANALYZER)?.trim().to_string();
            let uid = dir.owner_uid()?.ok_or_else(|| PipelineError::Corrupted {
                path: dump_dir.to_path_buf(),
                reason: "missing or invalid uid".into(),
            })?;
            let time = dir
                .load_text_opt(items::TIME)?
                .and_then(|text| text.trim().parse().ok())
                .unwrap_or_else(|| Utc::now().timestamp());
            (executable, analyzer, uid, time)
        };

        let package = if executable == "kernel" {
            Some(PackageInfo::new("kernel", "The Linux kernel"))
        } else {
            self.packages.resolve(&executable)?
        };
        let Some(package) = package.filter(|package| !package.name().is_empty()) else {
            return reject(dump_dir, RejectReason::UnknownPackage { executable });
        };
        let package_name = package.name().to_string();
        if self.config.is_blacklisted(&package_name) {
            return reject(dump_dir, RejectReason::Blacklisted { package: package_name });
        }
        if self.config.open_gpg_check
            && executable != "kernel"
            && !self.signatures.verify(&package, &executable, &self.config.open_gpg_public_keys)
        {
            return reject(dump_dir, RejectReason::SignatureMismatch { package: package_name });
        }

        {
            let dir = DumpDir::open(dump_dir, OpenFlags::default())?;
            dir.save_text(items::PACKAGE, &package.nvr)?;
            dir.save_text(items::COMPONENT, &package_name)?;
            dir.save_text(items::DESCRIPTION, &package.description)?;
        }

        let analyzer = self.registry.analyzer(&analyzer_name)?;
        let uuid = analyzer
            .local_uuid(dump_dir)
            .map_err(|source| PipelineError::plugin(&analyzer_name, source))?;
        if uuid.trim().is_empty() {
            return Err(PipelineError::EmptyUuid(dump_dir.to_path_buf()));
        }
        DumpDir::open(dump_dir, OpenFlags::default())?.save_text(items::UUID, &uuid)?;

        let entry = NewCrashEntry::new(uuid.as_str(), uid, dump_dir.display().to_string(), time);
        let outcome = self
            .database()?
            .insert(&entry)
            .map_err(|source| PipelineError::plugin(&self.config.database, source))?;

        match outcome.disposition {
            InsertDisposition::Created => {
                info!(uuid = %uuid, uid, dir = %dump_dir.display(), "new crash stored");
                self.run_actions(&self.config.actions_and_reporters, dump_dir);
            }
            InsertDisposition::Repeat => {
                let count = outcome.row.count;
                info!(uuid = %uuid, uid, count, "repeated crash, dropping directory");
                self.note_occurrence(&outcome.row, time);
                DumpDir::open(dump_dir, OpenFlags::default())?.delete()?;
            }
            InsertDisposition::AlreadyStored => {
                debug!(uuid = %uuid, uid, "directory already recorded");
            }
        }

        let mut summary = CrashSummary::from_row(&outcome.row);
        summary.package = package.nvr;
        summary.executable = executable;
        summary.description = package.description;
        summary.time = time;
        Ok(IngestOutcome::Stored(IngestReport { summary, disposition: outcome.disposition }))
    }

    /// Record the latest occurrence time in the retained directory.
    fn note_occurrence(&self, row: &DedupRow, time: i64) {
        match DumpDir::try_open(&row.dump_dir, None) {
            Ok(Some(dir)) => {
                if let Err(err) = dir.save_text(items::LAST_OCCURRENCE, &time.to_string()) {
                    warn!(dir = %row.dump_dir, "can't save last occurrence: {err}");
                }
            }
            Ok(None) => debug!(dir = %row.dump_dir, "retained directory busy or gone"),
            Err(err) => warn!(dir = %row.dump_dir, "can't open retained directory: {err}"),
        }
    }

    /// Run the Action plugins among `calls`; failures are logged only.
    fn run_actions(&self, calls: &[PluginCall], dump_dir: &Path) {
        for call in calls {
            if self.registry.capability_of(&call.name) != Some(Capability::Action) {
                continue;
            }
            let result = self
                .registry
                .action(&call.name)
                .map_err(PipelineError::from)
                .and_then(|action| {
                    action
                        .run(dump_dir, &call.args)
                        .map_err(|source| PipelineError::plugin(&call.name, source))
                });
            if let Err(err) = result {
                warn!(action = %call.name, dir = %dump_dir.display(), "action failed: {err}");
            }
        }
    }

    /// Generate report data for a stored crash and assemble the record.
    pub fn build_report(
        &self,
        uuid: &str,
        uid: u32,
        force: bool,
    ) -> Result<BuiltReport, PipelineError> {
        let not_found = || PipelineError::NotInDatabase { uuid: uuid.to_string(), uid };
        if uuid.trim().is_empty() {
            return Err(not_found());
        }
        let row = self
            .database()?
            .get(uuid, uid)
            .map_err(|source| PipelineError::plugin(&self.config.database, source))?
            .ok_or_else(not_found)?;
        let dump_dir = PathBuf::from(&row.dump_dir);

        let (analyzer_name, package) = {
            let dir = DumpDir::open(&dump_dir, OpenFlags::default().for_uid(uid))?;
            let analyzer = dir.load_text(items::ANALYZER)?.trim().to_string();
            let package = dir.load_text_opt(items::PACKAGE)?.unwrap_or_default();
            (analyzer, package.trim().to_string())
        };

        let analyzer = self.registry.analyzer(&analyzer_name)?;
        analyzer
            .create_report(&dump_dir, force)
            .map_err(|source| PipelineError::plugin(&analyzer_name, source))?;
        let calls = self.config.reporters_for(&analyzer_name, package_name_from_nvr(&package));
        self.run_actions(calls, &dump_dir);

        let global_uuid = analyzer
            .global_uuid(&dump_dir)
            .map_err(|source| PipelineError::plugin(&analyzer_name, source))?;

        let dir = DumpDir::open(&dump_dir, OpenFlags::default())?;
        dir.save_text(items::DUPHASH, &global_uuid)?;
        let mut record = CrashRecord::new();
        for item in dir.enumerate()? {
            let name = item.name.as_str();
            if SKIPPED_REPORT_ITEMS.contains(&name) {
                continue;
            }
            let crash_item = if !item.is_text {
                CrashItem::binary(dir.item_path(name)?.display().to_string())
            } else {
                let editable = !REQUIRED_REPORT_ITEMS.contains(&name);
                CrashItem::text(dir.load_text(name)?, editable)
            };
            record.insert(item.name, crash_item);
        }
        dir.close();

        record.insert(report_items::UUID, CrashItem::text(global_uuid, false));
        record.insert(report_items::ANALYZER, CrashItem::system(analyzer_name.as_str()));
        record.insert(report_items::UID, CrashItem::system(uid.to_string()));
        record.insert(report_items::LOCAL_UUID, CrashItem::system(uuid));
        record.insert_if_absent(items::COMMENT, CrashItem::text("", true));
        record.insert_if_absent(items::REPRODUCE, CrashItem::text(DEFAULT_REPRODUCE, true));

        let token = ReportToken { analyzer: analyzer_name, uid, uuid: uuid.to_string() }.encode();
        Ok(BuiltReport { record, token })
    }

    /// Mark the crash reported, then hand the record to every configured
    /// reporter. A failing reporter is logged and counted; the rest still run.
    pub fn dispatch(
        &self,
        record: &CrashRecord,
        token: &str,
    ) -> Result<DispatchSummary, PipelineError> {
        let token = ReportToken::decode(token)?;
        check_report(record)?;

        let db = self.database()?;
        let marked = db
            .set_reported(&token.uuid, token.uid, "")
            .map_err(|source| PipelineError::plugin(&self.config.database, source))?;
        if !marked {
            return Err(PipelineError::NotInDatabase { uuid: token.uuid, uid: token.uid });
        }

        let package = record.content(items::PACKAGE).unwrap_or_default().trim();
        let calls = self.config.reporters_for(&token.analyzer, package_name_from_nvr(package));
        let mut summary = DispatchSummary::default();
        for call in calls {
            if self.registry.capability_of(&call.name) == Some(Capability::Action) {
                continue;
            }
            summary.dispatched += 1;
            let result = self
                .registry
                .reporter(&call.name)
                .map_err(PipelineError::from)
                .and_then(|reporter| {
                    reporter
                        .report(record, &call.args)
                        .map_err(|source| PipelineError::plugin(&call.name, source))
                });
            match result {
                Ok(message) => {
                    info!(reporter = %call.name, uuid = %token.uuid, "{message}");
                    summary.results.push(ReporterOutcome {
                        reporter: call.name.clone(),
                        ok: true,
                        message,
                    });
                }
                Err(err) => {
                    error!(reporter = %call.name, uuid = %token.uuid, "reporter failed: {err}");
                    summary.failed += 1;
                    summary.results.push(ReporterOutcome {
                        reporter: call.name.clone(),
                        ok: false,
                        message: err.to_string(),
                    });
                }
            }
        }

        let message = summary
            .results
            .iter()
            .filter(|outcome| outcome.ok)
            .map(|outcome| outcome.message.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        db.set_reported(&token.uuid, token.uid, &message)
            .map_err(|source| PipelineError::plugin(&self.config.database, source))?;

        info!(uuid = %token.uuid, "{} dispatched, {} failed", summary.dispatched, summary.failed);
        Ok(summary)
    }

    /// Crashes visible to `uid`; the privileged uid sees every row.
    ///
    /// Rows whose directory is missing or busy are skipped.
    pub fn list_for_user(&self, uid: u32) -> Result<Vec<CrashSummary>, PipelineError> {
        let filter = (uid != PRIVILEGED_UID).then_some(uid);
        let rows = self
            .database()?
            .list(filter)
            .map_err(|source| PipelineError::plugin(&self.config.database, source))?;

        let mut out = Vec::new();
        for row in rows {
            let dir = match DumpDir::try_open(&row.dump_dir, None) {
                Ok(Some(dir)) => dir,
                Ok(None) => {
                    debug!(dir = %row.dump_dir, "skipping busy or missing directory");
                    continue;
                }
                Err(err) => {
                    warn!(dir = %row.dump_dir, "skipping unreadable directory: {err}");
                    continue;
                }
            };
            let mut summary = CrashSummary::from_row(&row);
            let read = |name: &str| -> String {
                dir.load_text_opt(name)
                    .ok()
                    .flatten()
                    .map(|text| text.trim().to_string())
                    .unwrap_or_default()
            };
            summary.executable = read(items::EXECUTABLE);
            summary.package = read(items::PACKAGE);
            summary.description = read(items::DESCRIPTION);
            out.push(summary);
        }
        Ok(out)
    }

    /// Delete a crash's ledger row and its directory.
    ///
    /// Returns the deleted directory, or `None` when there was no such row.
    pub fn delete(&self, uuid: &str, uid: u32) -> Result<Option<PathBuf>, PipelineError> {
        let db = self.database()?;
        let plugin_err = |source| PipelineError::plugin(&self.config.database, source);
        let Some(row) = db.get(uuid, uid).map_err(plugin_err)? else {
            debug!(uuid, uid, "nothing to delete");
            return Ok(None);
        };
        db.delete(uuid, uid).map_err(plugin_err)?;

        let path = PathBuf::from(&row.dump_dir);
        match DumpDir::open(&path, OpenFlags::default()) {
            Ok(dir) => dir.delete()?,
            Err(DumpError::NotFound(_)) => debug!(dir = %path.display(), "directory already gone"),
            Err(err) => return Err(err.into()),
        }
        info!(uuid, uid, dir = %path.display(), "crash deleted");
        Ok(Some(path))
    }
}

fn reject(dump_dir: &Path, reason: RejectReason) -> Result<IngestOutcome, PipelineError> {
    info!(dir = %dump_dir.display(), ?reason, "crash rejected");
    DumpDir::open(dump_dir, OpenFlags::default())?.delete()?;
    Ok(IngestOutcome::Rejected(reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_through_wire_encoding() {
        let token = ReportToken { analyzer: "CCpp".into(), uid: 500, uuid: "abc".into() };
        assert_eq!(ReportToken::decode(&token.encode()).expect("decode"), token);
        assert!(matches!(ReportToken::decode("(3)abc"), Err(PipelineError::InvalidToken(_))));
    }

    #[test]
    fn check_report_names_first_missing_item() {
        let mut record = CrashRecord::new();
        record.insert(report_items::ANALYZER, CrashItem::system("CCpp"));
        let err = check_report(&record).expect_err("incomplete");
        assert_eq!(err.to_string(), "corrupted report: missing _MWUID");
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn outcomes_serialize_with_status_and_reason_tags() {
        let reason = RejectReason::Blacklisted { package: "bash".into() };
        let rejected = IngestOutcome::Rejected(reason);
        assert_eq!(
            serde_json::to_value(&rejected).expect("json"),
            serde_json::json!({ "status": "rejected", "reason": "blacklisted", "package": "bash" })
        );
    }
}
