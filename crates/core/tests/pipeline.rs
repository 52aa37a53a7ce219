use std::fs;
use std::path::{Path, PathBuf};

use crashvault_core::db::{InsertDisposition, PolicyConfig};
use crashvault_core::dump::{DumpDir, OpenFlags};
use crashvault_core::model::{items, report_items, CrashRecord};
use crashvault_core::plugins::{
    Capability, Plugin, PluginDescriptor, PluginError, PluginInstance, Reporter,
};
use crashvault_core::services::{
    CrashPipeline, IngestOutcome, IngestReport, PackageInfo, PipelineError, RejectReason,
    ReportToken, SignatureVerifier, StaticPackageResolver,
};
use tempfile::{tempdir, TempDir};

const POLICY: &str = r#"
[Common]
BlackList = valgrind
ActionsAndReporters = RunApp("echo hi", note)

[AnalyzerActionsAndReporters]
Python = Broken, Memo
"#;

struct Memo;

impl Plugin for Memo {}

impl Reporter for Memo {
    fn report(&self, record: &CrashRecord, _args: &str) -> Result<String, PluginError> {
        Ok(format!("memo for {}", record.content(items::PACKAGE).unwrap_or_default()))
    }
}

struct Broken;

impl Plugin for Broken {}

impl Reporter for Broken {
    fn report(&self, _record: &CrashRecord, _args: &str) -> Result<String, PluginError> {
        Err(PluginError::failed("tracker unreachable"))
    }
}

struct RejectAll;

impl SignatureVerifier for RejectAll {
    fn verify(&self, _package: &PackageInfo, _executable: &str, _keys: &[String]) -> bool {
        false
    }
}

struct Fixture {
    _tmp: TempDir,
    spool: PathBuf,
    pipeline: CrashPipeline,
}

fn resolver() -> StaticPackageResolver {
    StaticPackageResolver::new()
        .with(
            "/usr/bin/hello.py",
            PackageInfo::new("python3-hello-1.0-1.fc38", "Says hello"),
        )
        .with("/usr/bin/valgrind", PackageInfo::new("valgrind-3.21.0-1.fc38", "Memory checker"))
}

fn fixture(extra_policy: &str) -> Fixture {
    let tmp = tempdir().expect("tempdir");
    let spool = tmp.path().join("spool");
    let plugins = tmp.path().join("plugins");
    fs::create_dir_all(&spool).expect("spool");
    fs::create_dir_all(&plugins).expect("plugins");
    fs::write(
        plugins.join("SQLite3.conf"),
        format!("DBPath = {}\n", tmp.path().join("ledger.db").display()),
    )
    .expect("sqlite conf");

    let base = PolicyConfig {
        dump_location: spool.clone(),
        plugins_conf_dir: plugins,
        ..PolicyConfig::default()
    };
    let config =
        PolicyConfig::parse_with_base(&format!("{POLICY}{extra_policy}"), base).expect("policy");

    let mut pipeline = CrashPipeline::bootstrap(config, resolver()).expect("bootstrap");
    let registry = pipeline.registry_mut();
    registry.add_to_catalog(PluginDescriptor::new(Capability::Reporter, "Memo", || {
        PluginInstance::Reporter(Box::new(Memo))
    }));
    registry.add_to_catalog(PluginDescriptor::new(Capability::Reporter, "Broken", || {
        PluginInstance::Reporter(Box::new(Broken))
    }));
    registry.activate("Memo").expect("memo");
    registry.activate("Broken").expect("broken");

    Fixture { _tmp: tmp, spool, pipeline }
}

fn capture(spool: &Path, name: &str, uid: u32, executable: &str, uuid: &str) -> PathBuf {
    let path = spool.join(name);
    let dir = DumpDir::create(&path, uid).expect("create");
    dir.save_text(items::ANALYZER, "Python").expect("analyzer");
    dir.save_text(items::EXECUTABLE, executable).expect("executable");
    dir.save_text(items::UUID, uuid).expect("uuid");
    dir.save_text(items::BACKTRACE, "Traceback (most recent call last):\n").expect("bt");
    dir.close();
    path
}

fn stored(outcome: IngestOutcome) -> IngestReport {
    match outcome {
        IngestOutcome::Stored(report) => report,
        IngestOutcome::Rejected(reason) => panic!("unexpected rejection: {reason:?}"),
    }
}

fn read_item(path: &Path, item: &str) -> Option<String> {
    let dir = DumpDir::open(path, OpenFlags::default()).expect("open");
    dir.load_text_opt(item).expect("load")
}

#[test]
fn repeated_crash_bumps_count_and_drops_second_directory() {
    let fx = fixture("");
    let first = capture(&fx.spool, "pyhook-1", 500, "/usr/bin/hello.py", "aaaa");
    let second = capture(&fx.spool, "pyhook-2", 500, "/usr/bin/hello.py", "aaaa");

    let created = stored(fx.pipeline.ingest(&first).expect("ingest first"));
    assert_eq!(created.disposition, InsertDisposition::Created);
    assert_eq!(created.summary.count, 1);
    assert!(!created.summary.reported);
    assert_eq!(created.summary.package, "python3-hello-1.0-1.fc38");
    assert_eq!(read_item(&first, items::COMPONENT).as_deref(), Some("python3-hello"));

    let repeat = stored(fx.pipeline.ingest(&second).expect("ingest second"));
    assert_eq!(repeat.disposition, InsertDisposition::Repeat);
    assert_eq!(repeat.summary.count, 2);
    assert_eq!(repeat.summary.dump_dir, first.display().to_string());
    assert!(!second.exists());
    assert!(first.exists());
    assert!(read_item(&first, items::LAST_OCCURRENCE).is_some());

    let again = stored(fx.pipeline.ingest(&first).expect("ingest again"));
    assert_eq!(again.disposition, InsertDisposition::AlreadyStored);
    assert_eq!(again.summary.count, 2);
}

#[test]
fn new_crash_runs_configured_actions() {
    let fx = fixture("");
    let path = capture(&fx.spool, "pyhook-1", 500, "/usr/bin/hello.py", "aaaa");
    fx.pipeline.ingest(&path).expect("ingest");
    assert_eq!(read_item(&path, "note").as_deref(), Some("hi\n"));
}

#[test]
fn rejected_crashes_are_deleted() {
    let fx = fixture("");

    let unknown = capture(&fx.spool, "pyhook-1", 500, "/opt/local/tool.py", "aaaa");
    match fx.pipeline.ingest(&unknown).expect("ingest") {
        IngestOutcome::Rejected(RejectReason::UnknownPackage { executable }) => {
            assert_eq!(executable, "/opt/local/tool.py")
        }
        other => panic!("expected UnknownPackage, got {other:?}"),
    }
    assert!(!unknown.exists());

    let blacklisted = capture(&fx.spool, "pyhook-2", 500, "/usr/bin/valgrind", "bbbb");
    match fx.pipeline.ingest(&blacklisted).expect("ingest") {
        IngestOutcome::Rejected(RejectReason::Blacklisted { package }) => {
            assert_eq!(package, "valgrind")
        }
        other => panic!("expected Blacklisted, got {other:?}"),
    }
    assert!(!blacklisted.exists());
    assert!(fx.pipeline.list_for_user(0).expect("list").is_empty());
}

#[test]
fn unsigned_package_is_rejected_when_checking_signatures() {
    let mut fx = fixture("[Common]\nEnableOpenGPG = yes\n");
    assert!(fx.pipeline.config().open_gpg_check);
    fx.pipeline = fx.pipeline.with_signature_verifier(RejectAll);

    let path = capture(&fx.spool, "pyhook-1", 500, "/usr/bin/hello.py", "aaaa");
    match fx.pipeline.ingest(&path).expect("ingest") {
        IngestOutcome::Rejected(RejectReason::SignatureMismatch { package }) => {
            assert_eq!(package, "python3-hello")
        }
        other => panic!("expected SignatureMismatch, got {other:?}"),
    }
    assert!(!path.exists());
}

#[test]
fn report_is_dispatched_to_every_reporter() {
    let fx = fixture("");
    let path = capture(&fx.spool, "pyhook-1", 500, "/usr/bin/hello.py", "aaaa");
    fx.pipeline.ingest(&path).expect("ingest");

    let built = fx.pipeline.build_report("aaaa", 500, false).expect("build");
    assert_eq!(built.record.content(report_items::LOCAL_UUID), Some("aaaa"));
    assert_eq!(built.record.content(report_items::ANALYZER), Some("Python"));
    assert!(built.record.get(items::PACKAGE).is_some_and(|item| !item.editable));
    assert!(built.record.get(items::COMMENT).is_some_and(|item| item.editable));
    assert!(!built.record.contains(items::UID));
    assert_eq!(read_item(&path, items::DUPHASH).map(|hash| hash.len()), Some(40));

    let summary = fx.pipeline.dispatch(&built.record, &built.token).expect("dispatch");
    assert_eq!((summary.dispatched, summary.failed), (2, 1));
    let broken = summary.results.iter().find(|r| r.reporter == "Broken").expect("broken");
    assert!(!broken.ok);
    assert!(broken.message.contains("tracker unreachable"));

    let rows = fx.pipeline.list_for_user(500).expect("list");
    assert_eq!(rows.len(), 1);
    assert!(rows[0].reported);
    assert_eq!(rows[0].message, "memo for python3-hello-1.0-1.fc38");
}

#[test]
fn unknown_crash_or_token_is_refused() {
    let fx = fixture("");
    match fx.pipeline.build_report("missing", 500, false) {
        Err(PipelineError::NotInDatabase { uuid, uid }) => {
            assert_eq!((uuid.as_str(), uid), ("missing", 500))
        }
        other => panic!("expected NotInDatabase, got {other:?}"),
    }

    let path = capture(&fx.spool, "pyhook-1", 500, "/usr/bin/hello.py", "aaaa");
    fx.pipeline.ingest(&path).expect("ingest");
    let built = fx.pipeline.build_report("aaaa", 500, false).expect("build");

    assert!(matches!(
        fx.pipeline.dispatch(&built.record, "(3)abc"),
        Err(PipelineError::InvalidToken(_))
    ));

    let other_user = ReportToken { analyzer: "Python".into(), uid: 501, uuid: "aaaa".into() };
    assert!(matches!(
        fx.pipeline.dispatch(&built.record, &other_user.encode()),
        Err(PipelineError::NotInDatabase { .. })
    ));
    assert!(!fx.pipeline.list_for_user(500).expect("list")[0].reported);
}

#[test]
fn listing_filters_by_user_and_skips_missing_directories() {
    let fx = fixture("");
    let mine = capture(&fx.spool, "pyhook-1", 500, "/usr/bin/hello.py", "aaaa");
    let theirs = capture(&fx.spool, "pyhook-2", 501, "/usr/bin/hello.py", "bbbb");
    fx.pipeline.ingest(&mine).expect("ingest mine");
    fx.pipeline.ingest(&theirs).expect("ingest theirs");

    let own = fx.pipeline.list_for_user(500).expect("list");
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].uuid, "aaaa");
    assert_eq!(own[0].executable, "/usr/bin/hello.py");
    assert_eq!(own[0].description, "Says hello");
    assert_eq!(fx.pipeline.list_for_user(0).expect("list all").len(), 2);

    fs::remove_dir_all(&theirs).expect("remove");
    let all = fx.pipeline.list_for_user(0).expect("list all");
    assert_eq!(all.iter().map(|c| c.uuid.as_str()).collect::<Vec<_>>(), vec!["aaaa"]);
}

#[test]
fn delete_removes_row_and_directory_once() {
    let fx = fixture("");
    let path = capture(&fx.spool, "pyhook-1", 500, "/usr/bin/hello.py", "aaaa");
    fx.pipeline.ingest(&path).expect("ingest");

    assert_eq!(fx.pipeline.delete("aaaa", 500).expect("delete"), Some(path.clone()));
    assert!(!path.exists());
    assert_eq!(fx.pipeline.delete("aaaa", 500).expect("delete again"), None);
    assert!(fx.pipeline.list_for_user(500).expect("list").is_empty());
}
