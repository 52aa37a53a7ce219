use anyhow::{Context, Result};
use crashvault_core::db::InsertDisposition;
use crashvault_core::model::CrashRecord;
use crashvault_core::services::{DispatchSummary, IngestOutcome, RejectReason};
use serde::Serialize;

use crate::canonicalize_or_current;
use crate::commands::{layout_for, open_pipeline, print_json};

/// Run a freshly captured dump directory through the pipeline.
pub fn ingest_command(root: &str, dir: &str, package: Option<&str>, json: bool) -> Result<()> {
    let layout = layout_for(root)?;
    let pipeline = open_pipeline(&layout, package)?;
    let dump_dir = canonicalize_or_current(dir)?;
    let outcome = pipeline
        .ingest(&dump_dir)
        .with_context(|| format!("Failed to ingest {}", dump_dir.display()))?;

    if json {
        return print_json(&outcome, "ingest outcome");
    }
    match outcome {
        IngestOutcome::Stored(report) => {
            let summary = &report.summary;
            let what = match report.disposition {
                InsertDisposition::Created => "new crash",
                InsertDisposition::Repeat => "repeated crash",
                InsertDisposition::AlreadyStored => "already stored",
            };
            println!("Stored {what}:");
            println!("  UUID: {}", summary.uuid);
            println!("  UID: {}", summary.uid);
            println!("  Count: {}", summary.count);
            println!("  Package: {}", summary.package);
            println!("  Executable: {}", summary.executable);
        }
        IngestOutcome::Rejected(reason) => match reason {
            RejectReason::UnknownPackage { executable } => {
                println!("Rejected: no package owns {executable}")
            }
            RejectReason::Blacklisted { package } => {
                println!("Rejected: package {package} is blacklisted")
            }
            RejectReason::SignatureMismatch { package } => {
                println!("Rejected: package {package} is not signed by a trusted key")
            }
        },
    }
    Ok(())
}

/// List the crashes visible to `uid`.
pub fn list_command(root: &str, uid: u32, json: bool) -> Result<()> {
    let layout = layout_for(root)?;
    let pipeline = open_pipeline(&layout, None)?;
    let crashes = pipeline.list_for_user(uid).context("Failed to list crashes")?;

    if json {
        return print_json(&crashes, "crashes");
    }
    println!("Crashes ({}):", crashes.len());
    if crashes.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for crash in crashes {
        let reported = if crash.reported { "reported" } else { "not reported" };
        println!(
            "  - {} uid={} count={} [{reported}] {} ({})",
            crash.uuid, crash.uid, crash.count, crash.executable, crash.package
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct ReportRun<'a> {
    record: &'a CrashRecord,
    summary: &'a DispatchSummary,
}

/// Build the report for a stored crash and send it to the configured reporters.
pub fn report_command(root: &str, uuid: &str, uid: u32, force: bool, json: bool) -> Result<()> {
    let layout = layout_for(root)?;
    let pipeline = open_pipeline(&layout, None)?;
    let built = pipeline
        .build_report(uuid, uid, force)
        .with_context(|| format!("Failed to build report for {uuid}"))?;
    let summary = pipeline
        .dispatch(&built.record, &built.token)
        .with_context(|| format!("Failed to dispatch report for {uuid}"))?;

    if json {
        return print_json(&ReportRun { record: &built.record, summary: &summary }, "report");
    }
    for outcome in &summary.results {
        let status = if outcome.ok { "ok" } else { "FAILED" };
        println!("  - {} [{status}] {}", outcome.reporter, outcome.message);
    }
    println!("{} dispatched, {} failed", summary.dispatched, summary.failed);
    Ok(())
}

/// Delete a crash's ledger row and dump directory.
pub fn delete_command(root: &str, uuid: &str, uid: u32) -> Result<()> {
    let layout = layout_for(root)?;
    let pipeline = open_pipeline(&layout, None)?;
    match pipeline.delete(uuid, uid).with_context(|| format!("Failed to delete {uuid}"))? {
        Some(dir) => println!("Deleted crash {uuid} ({})", dir.display()),
        None => println!("No crash {uuid} for uid {uid}"),
    }
    Ok(())
}
