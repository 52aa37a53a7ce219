//! Size-bounded debug-symbol cache.
//!
//! Eviction picks the file with the highest `size_kb * age_minutes` (age at
//! least one minute), so large stale files go first. A trim can take a while on
//! a big cache and should run off the hot path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Default location of the shared debuginfo cache.
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/abrt-di";

/// Default cache cap in megabytes.
pub const DEFAULT_CACHE_MB: u64 = 4000;

const MEGABYTE: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of one pass over the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheScan {
    pub total_bytes: u64,
    /// File with the highest eviction score, if any.
    pub worst: Option<PathBuf>,
    pub worst_score: f64,
}

/// What a trim removed and what is left.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrimReport {
    pub removed: Vec<PathBuf>,
    pub remaining_bytes: u64,
}

/// Eviction score of one file; larger is evicted first.
pub fn eviction_score(size_bytes: u64, modified: SystemTime, now: SystemTime) -> f64 {
    let age_minutes = now.duration_since(modified).map(|age| age.as_secs() / 60).unwrap_or(0);
    (size_bytes as f64 / 1024.0) * age_minutes.max(1) as f64
}

/// Sum regular-file sizes under `root` (symlinks are not followed) and find the worst file.
pub fn scan_cache(root: &Path, now: SystemTime) -> Result<CacheScan, CacheError> {
    let mut scan = CacheScan::default();
    if !root.exists() {
        return Ok(scan);
    }

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|source| CacheError::Scan { path: root.to_path_buf(), source })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry
            .metadata()
            .map_err(|source| CacheError::Scan { path: entry.path().to_path_buf(), source })?;
        let size = meta.len();
        scan.total_bytes += size;

        let modified = meta.modified().unwrap_or(now);
        let score = eviction_score(size, modified, now);
        if scan.worst.is_none() || score > scan.worst_score {
            scan.worst = Some(entry.into_path());
            scan.worst_score = score;
        }
    }
    Ok(scan)
}

/// Total size in bytes of the regular files under `root`.
pub fn directory_size(root: &Path) -> Result<u64, CacheError> {
    Ok(scan_cache(root, SystemTime::now())?.total_bytes)
}

/// Evict files until the cache is below `max_mb` megabytes.
pub fn trim_cache(root: &Path, max_mb: u64) -> Result<TrimReport, CacheError> {
    trim_cache_at(root, max_mb, SystemTime::now())
}

/// `trim_cache` with an explicit clock, so ages are reproducible.
pub fn trim_cache_at(root: &Path, max_mb: u64, now: SystemTime) -> Result<TrimReport, CacheError> {
    let cap = max_mb.saturating_mul(MEGABYTE);
    let mut report = TrimReport::default();

    loop {
        let scan = scan_cache(root, now)?;
        report.remaining_bytes = scan.total_bytes;
        if scan.total_bytes < cap {
            break;
        }
        let Some(worst) = scan.worst else {
            break;
        };

        debug!(file = %worst.display(), score = scan.worst_score, "evicting from debuginfo cache");
        // A file we cannot remove would be picked again forever; stop instead.
        fs::remove_file(&worst)
            .map_err(|source| CacheError::Remove { path: worst.clone(), source })?;
        report.removed.push(worst);
    }

    if !report.removed.is_empty() {
        info!(
            cache = %root.display(),
            removed = report.removed.len(),
            remaining_bytes = report.remaining_bytes,
            "trimmed debuginfo cache"
        );
    }
    Ok(report)
}
