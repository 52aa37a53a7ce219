//! Package-metadata and signature collaborators used at ingest.

use std::collections::BTreeMap;
use std::process::Command;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use super::exec::{run_with_timeout, ExecError};

const RPM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PackageError {
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Package owning an executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    /// `name-version-release[.arch]`.
    pub nvr: String,
    pub description: String,
}

impl PackageInfo {
    pub fn new(nvr: impl Into<String>, description: impl Into<String>) -> Self {
        Self { nvr: nvr.into(), description: description.into() }
    }

    pub fn name(&self) -> &str {
        package_name_from_nvr(&self.nvr)
    }
}

/// `bash-5.2.15-1.fc38` -> `bash`: drop the last two `-` components.
pub fn package_name_from_nvr(nvr: &str) -> &str {
    nvr.rsplitn(3, '-').nth(2).unwrap_or(nvr)
}

/// Finds the package that owns an executable.
pub trait PackageResolver {
    /// `Ok(None)` when no package owns the file.
    fn resolve(&self, executable: &str) -> Result<Option<PackageInfo>, PackageError>;
}

/// Checks a package's signature against trusted keys.
pub trait SignatureVerifier {
    fn verify(&self, package: &PackageInfo, executable: &str, trusted_keys: &[String]) -> bool;
}

/// Queries the rpm database.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpmPackageResolver;

impl PackageResolver for RpmPackageResolver {
    fn resolve(&self, executable: &str) -> Result<Option<PackageInfo>, PackageError> {
        let mut command = Command::new("rpm");
        command.args(["-qf", "--qf", "%{NAME}-%{VERSION}-%{RELEASE}\\n%{SUMMARY}\\n", executable]);
        let output = run_with_timeout(&mut command, RPM_TIMEOUT)?;
        if !output.success() {
            debug!(executable, "no package owns executable");
            return Ok(None);
        }
        let mut lines = output.stdout.lines();
        let nvr = lines.next().unwrap_or_default().trim();
        if nvr.is_empty() {
            return Ok(None);
        }
        let description = lines.next().unwrap_or_default().trim();
        Ok(Some(PackageInfo::new(nvr, description)))
    }
}

/// Accepts a package when rpm reports a PGP signature from one of the trusted keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpmSignatureVerifier;

impl SignatureVerifier for RpmSignatureVerifier {
    fn verify(&self, package: &PackageInfo, _executable: &str, trusted_keys: &[String]) -> bool {
        let mut command = Command::new("rpm");
        command.args(["-q", "--qf", "%{SIGPGP:pgpsig}\\n", &package.nvr]);
        let Ok(output) = run_with_timeout(&mut command, RPM_TIMEOUT) else {
            return false;
        };
        let Some((_, key)) = output.stdout.split_once("Key ID") else {
            return false;
        };
        let key = key.trim();
        trusted_keys.iter().any(|trusted| key.eq_ignore_ascii_case(trusted.trim()))
    }
}

/// Fixed executable -> package map with an optional fallback.
#[derive(Debug, Clone, Default)]
pub struct StaticPackageResolver {
    packages: BTreeMap<String, PackageInfo>,
    fallback: Option<PackageInfo>,
}

impl StaticPackageResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, executable: impl Into<String>, package: PackageInfo) -> Self {
        self.packages.insert(executable.into(), package);
        self
    }

    /// Package returned for any executable not in the map.
    pub fn with_fallback(mut self, package: PackageInfo) -> Self {
        self.fallback = Some(package);
        self
    }
}

impl PackageResolver for StaticPackageResolver {
    fn resolve(&self, executable: &str) -> Result<Option<PackageInfo>, PackageError> {
        Ok(self.packages.get(executable).or(self.fallback.as_ref()).cloned())
    }
}

/// Verifier that accepts everything; used when signature checking is off.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SignatureVerifier for AcceptAll {
    fn verify(&self, _package: &PackageInfo, _executable: &str, _trusted_keys: &[String]) -> bool {
        true
    }
}
