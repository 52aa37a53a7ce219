//! Element-level access to problem directories for front ends.
//!
//! A problem id is the path of a dump directory directly under the dump
//! location; anything else is treated as unknown.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{directory_size, CacheError};
use crate::db::PolicyConfig;
use crate::dump::{is_valid_item_name, DumpDir, DumpError, OpenFlags, PRIVILEGED_UID};
use crate::model::{items, CrashItem, CrashRecord};

const MEGABYTE: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("problem '{0}' does not exist")]
    NotFound(String),

    #[error("uid {uid} may not access problem '{id}'")]
    PermissionDenied { id: String, uid: u32 },

    #[error("'{0}' is not a valid element name")]
    InvalidElement(String),

    #[error("element '{0}' can't be changed")]
    Protected(String),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("dump location would exceed {max_mb} MB")]
    TooBig { max_mb: u64 },

    #[error(transparent)]
    Dump(DumpError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Problem directory operations scoped to one dump location.
#[derive(Debug)]
pub struct ProblemService {
    dump_location: PathBuf,
    max_size_mb: u64,
    sequence: AtomicU32,
}

impl ProblemService {
    pub fn new(dump_location: impl Into<PathBuf>, max_size_mb: u64) -> Self {
        Self { dump_location: dump_location.into(), max_size_mb, sequence: AtomicU32::new(0) }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(&config.dump_location, config.max_crash_reports_size_mb)
    }

    pub fn dump_location(&self) -> &Path {
        &self.dump_location
    }

    fn resolve(&self, id: &str) -> ServiceResult<PathBuf> {
        let path = Path::new(id);
        let path =
            if path.is_absolute() { path.to_path_buf() } else { self.dump_location.join(path) };
        let name_ok = path.file_name().and_then(|n| n.to_str()).is_some_and(is_valid_item_name);
        if !name_ok || path.parent() != Some(self.dump_location.as_path()) {
            return Err(ServiceError::NotFound(id.to_string()));
        }
        Ok(path)
    }

    fn open(&self, id: &str, caller: u32) -> ServiceResult<DumpDir> {
        let path = self.resolve(id)?;
        DumpDir::open(&path, OpenFlags::default().for_uid(caller)).map_err(|err| match err {
            DumpError::NotFound(_) => ServiceError::NotFound(id.to_string()),
            DumpError::PermissionDenied { uid, .. } => {
                ServiceError::PermissionDenied { id: id.to_string(), uid }
            }
            other => ServiceError::Dump(other),
        })
    }

    /// Create a problem directory from `fields`; returns its id.
    ///
    /// `analyzer` is required. The owner is the caller, except that a
    /// privileged caller may set `uid` explicitly.
    pub fn new_problem(
        &self,
        fields: &BTreeMap<String, String>,
        caller: u32,
    ) -> ServiceResult<String> {
        let analyzer = fields
            .get(items::ANALYZER)
            .map(|value| value.trim())
            .filter(|value| is_valid_item_name(value))
            .ok_or_else(|| ServiceError::MissingField(items::ANALYZER.to_string()))?;
        if let Some(bad) = fields.keys().find(|name| !is_valid_item_name(name)) {
            return Err(ServiceError::InvalidElement(bad.clone()));
        }

        let owner = match fields.get(items::UID) {
            Some(uid) if caller == PRIVILEGED_UID => uid.trim().parse().unwrap_or(caller),
            _ => caller,
        };

        fs::create_dir_all(&self.dump_location)
            .map_err(|source| ServiceError::Dump(DumpError::io(&self.dump_location, source)))?;
        let name = format!(
            "{}-{}-{}-{}",
            analyzer,
            Utc::now().format("%Y-%m-%d-%H%M%S"),
            std::process::id(),
            self.sequence.fetch_add(1, Ordering::Relaxed)
        );
        let path = self.dump_location.join(name);
        let dir = DumpDir::create(&path, owner).map_err(ServiceError::Dump)?;
        for (key, value) in fields {
            if key == items::UID {
                continue;
            }
            dir.save_text(key, value).map_err(ServiceError::Dump)?;
        }
        info!(dir = %path.display(), owner, "new problem created");
        Ok(path.display().to_string())
    }

    /// Ids of every problem the caller can access, sorted.
    pub fn list(&self, caller: u32) -> ServiceResult<Vec<String>> {
        let entries = match fs::read_dir(&self.dump_location) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ServiceError::Dump(DumpError::io(&self.dump_location, source)))
            }
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|source| ServiceError::Dump(DumpError::io(&self.dump_location, source)))?;
            if entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut out = Vec::new();
        for path in paths {
            match DumpDir::try_open(&path, Some(caller)) {
                Ok(Some(_)) => out.push(path.display().to_string()),
                Ok(None) => debug!(dir = %path.display(), "skipping busy problem"),
                Err(DumpError::PermissionDenied { .. }) => {}
                Err(err) => warn!(dir = %path.display(), "skipping unreadable problem: {err}"),
            }
        }
        Ok(out)
    }

    /// Text values of the requested elements; absent or binary ones are left out.
    pub fn get_info(
        &self,
        id: &str,
        names: &[&str],
        caller: u32,
    ) -> ServiceResult<BTreeMap<String, String>> {
        let dir = self.open(id, caller)?;
        let mut out = BTreeMap::new();
        for name in names {
            match dir.load_text_opt(name) {
                Ok(Some(value)) => {
                    out.insert((*name).to_string(), value);
                }
                Ok(None)
                | Err(DumpError::NotText { .. })
                | Err(DumpError::InvalidItemName(_)) => {}
                Err(err) => return Err(ServiceError::Dump(err)),
            }
        }
        Ok(out)
    }

    pub fn set_element(&self, id: &str, name: &str, value: &str, caller: u32) -> ServiceResult<()> {
        check_element(name)?;
        let dir = self.open(id, caller)?;

        let used = directory_size(&self.dump_location)?;
        let replaced = dir.item_size(name).map_err(ServiceError::Dump)?.unwrap_or(0);
        let after = used.saturating_sub(replaced) + value.len() as u64;
        if after > self.max_size_mb.saturating_mul(MEGABYTE) {
            return Err(ServiceError::TooBig { max_mb: self.max_size_mb });
        }
        dir.save_text(name, value).map_err(ServiceError::Dump)
    }

    /// Returns whether the element existed.
    pub fn delete_element(&self, id: &str, name: &str, caller: u32) -> ServiceResult<bool> {
        check_element(name)?;
        self.open(id, caller)?.delete_item(name).map_err(ServiceError::Dump)
    }

    pub fn test_element_exists(&self, id: &str, name: &str, caller: u32) -> ServiceResult<bool> {
        Ok(self.open(id, caller)?.exists(name))
    }

    /// Every element as a typed record; binary elements carry their path.
    pub fn get_full_record(&self, id: &str, caller: u32) -> ServiceResult<CrashRecord> {
        let dir = self.open(id, caller)?;
        let mut record = CrashRecord::new();
        for item in dir.enumerate().map_err(ServiceError::Dump)? {
            let value = if item.is_text {
                CrashItem::text(dir.load_text(&item.name).map_err(ServiceError::Dump)?, true)
            } else {
                let path = dir.item_path(&item.name).map_err(ServiceError::Dump)?;
                CrashItem::binary(path.display().to_string())
            };
            record.insert(item.name, value);
        }
        Ok(record)
    }

    /// Make the caller the owner. Allowed for the current owner or a privileged caller.
    pub fn change_owner(&self, id: &str, caller: u32) -> ServiceResult<()> {
        let dir = self.open(id, caller)?;
        dir.save_text(items::UID, &caller.to_string()).map_err(ServiceError::Dump)?;
        info!(dir = %dir.path().display(), uid = caller, "problem owner changed");
        Ok(())
    }

    /// Delete each problem independently.
    pub fn delete(&self, ids: &[&str], caller: u32) -> Vec<(String, ServiceResult<()>)> {
        ids.iter()
            .map(|id| {
                let result = self
                    .open(id, caller)
                    .and_then(|dir| dir.delete().map_err(ServiceError::Dump));
                ((*id).to_string(), result)
            })
            .collect()
    }

    /// Problems whose `field` equals `value` and whose last occurrence (or
    /// creation time) lies in `from..=to`. `to == 0` means now.
    pub fn find_by_field_in_time_range(
        &self,
        field: &str,
        value: &str,
        from: i64,
        to: i64,
        caller: u32,
    ) -> ServiceResult<Vec<String>> {
        let to = if to == 0 { Utc::now().timestamp() } else { to };
        let mut out = Vec::new();
        for id in self.list(caller)? {
            let dir = match self.open(&id, caller) {
                Ok(dir) => dir,
                Err(err) => {
                    debug!(problem = %id, "skipping: {err}");
                    continue;
                }
            };
            let matches = dir
                .load_text_opt(field)
                .ok()
                .flatten()
                .is_some_and(|content| content.trim() == value);
            if !matches {
                continue;
            }
            let time = [items::LAST_OCCURRENCE, items::TIME]
                .iter()
                .find_map(|name| dir.load_text_opt(name).ok().flatten())
                .and_then(|text| text.trim().parse::<i64>().ok());
            if time.is_some_and(|time| (from..=to).contains(&time)) {
                out.push(id);
            }
        }
        Ok(out)
    }
}

fn check_element(name: &str) -> ServiceResult<()> {
    if name == items::UID {
        return Err(ServiceError::Protected(name.to_string()));
    }
    if !is_valid_item_name(name) {
        return Err(ServiceError::InvalidElement(name.to_string()));
    }
    Ok(())
}
