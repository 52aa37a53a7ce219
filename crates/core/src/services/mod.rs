//! Orchestration on top of the store, the ledger and the plugins.

pub mod exec;
pub mod packages;
pub mod pipeline;
pub mod problems;

pub use exec::{run_with_timeout, ExecError, ExecOutput};
pub use packages::{
    package_name_from_nvr, AcceptAll, PackageError, PackageInfo, PackageResolver,
    RpmPackageResolver, RpmSignatureVerifier, SignatureVerifier, StaticPackageResolver,
};
pub use pipeline::{
    check_report, BuiltReport, CrashPipeline, CrashSummary, DispatchSummary, ErrorKind,
    IngestOutcome, IngestReport, PipelineError, RejectReason, ReportToken, ReporterOutcome,
};
pub use problems::{ProblemService, ServiceError, ServiceResult};
