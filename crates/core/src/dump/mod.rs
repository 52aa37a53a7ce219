//! Dump directory store.
//!
//! A dump directory holds one crash: one file per named item. Every open
//! `DumpDir` owns the directory's exclusive lock, so holding a `DumpDir` is
//! what entitles a caller to mutate it. The lock is released when the handle
//! is closed, deleted or dropped, including on error paths.

mod lock;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::model::items;

use lock::DirLock;
pub use lock::LOCK_POLL_INTERVAL;

/// The privileged uid that may access every dump directory.
pub const PRIVILEGED_UID: u32 = 0;

/// Error type for dump directory operations.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("dump directory not found: {0}")]
    NotFound(PathBuf),

    #[error("dump directory already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Lock held by another session and the caller asked not to wait.
    #[error("dump directory is locked by another session: {0}")]
    Busy(PathBuf),

    #[error("uid {uid} may not access {path}")]
    PermissionDenied { path: PathBuf, uid: u32 },

    #[error("invalid item name '{0}'")]
    InvalidItemName(String),

    #[error("item '{item}' is missing in {dir}")]
    MissingItem { dir: PathBuf, item: String },

    #[error("item '{item}' in {dir} is not text")]
    NotText { dir: PathBuf, item: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DumpError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        DumpError::Io { path: path.to_path_buf(), source }
    }
}

/// Convenience result type for dump directory operations.
pub type DumpResult<T> = Result<T, DumpError>;

/// How to acquire the directory lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockMode {
    /// Wait until the current holder releases the lock.
    #[default]
    Blocking,
    /// Return `DumpError::Busy` immediately when the lock is held.
    FailQuietly,
}

/// Flags for `DumpDir::open`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub mode: LockMode,
    /// When set, the directory's `uid` item must match unless the caller is privileged.
    pub caller_uid: Option<u32>,
}

impl OpenFlags {
    pub fn fail_quietly() -> Self {
        Self { mode: LockMode::FailQuietly, caller_uid: None }
    }

    pub fn for_uid(mut self, uid: u32) -> Self {
        self.caller_uid = Some(uid);
        self
    }
}

/// One entry returned by `DumpDir::enumerate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpItem {
    pub name: String,
    pub is_text: bool,
}

/// Open, locked dump directory.
#[derive(Debug)]
pub struct DumpDir {
    path: PathBuf,
    _lock: DirLock,
}

impl DumpDir {
    /// Create a new dump directory owned by `owner_uid`.
    ///
    /// Fails if `path` already exists. The lock is taken before the directory
    /// appears on disk, so no other session can observe it half-written.
    pub fn create(path: impl AsRef<Path>, owner_uid: u32) -> DumpResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(DumpError::AlreadyExists(path));
        }
        let lock = DirLock::acquire(&path, LockMode::FailQuietly)?;
        fs::create_dir(&path).map_err(|source| match source.kind() {
            io::ErrorKind::AlreadyExists => DumpError::AlreadyExists(path.clone()),
            _ => DumpError::io(&path, source),
        })?;

        let dir = Self { path, _lock: lock };
        dir.save_text(items::UID, &owner_uid.to_string())?;
        dir.save_text(items::TIME, &Utc::now().timestamp().to_string())?;
        dir.save_text(items::ARCHITECTURE, std::env::consts::ARCH)?;
        if let Ok(release) = fs::read_to_string("/proc/sys/kernel/osrelease") {
            dir.save_text(items::KERNEL, release.trim())?;
        }
        debug!(dir = %dir.path.display(), owner_uid, "created dump directory");
        Ok(dir)
    }

    /// Open an existing dump directory, taking its lock.
    pub fn open(path: impl AsRef<Path>, flags: OpenFlags) -> DumpResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(DumpError::NotFound(path));
        }
        let lock = DirLock::acquire(&path, flags.mode)?;
        // The directory may have been deleted while we waited.
        if !path.is_dir() {
            return Err(DumpError::NotFound(path));
        }
        let dir = Self { path, _lock: lock };

        if let Some(uid) = flags.caller_uid {
            if !dir.accessible_by(uid)? {
                return Err(DumpError::PermissionDenied { path: dir.path.clone(), uid });
            }
        }
        Ok(dir)
    }

    /// Non-blocking open that treats a busy or missing directory as `None`.
    pub fn try_open(path: impl AsRef<Path>, caller_uid: Option<u32>) -> DumpResult<Option<Self>> {
        let flags = OpenFlags { mode: LockMode::FailQuietly, caller_uid };
        match Self::open(path, flags) {
            Ok(dir) => Ok(Some(dir)),
            Err(DumpError::Busy(_)) | Err(DumpError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock.
    pub fn close(self) {}

    /// Remove the directory and everything in it, then release the lock.
    pub fn delete(self) -> DumpResult<()> {
        let result =
            fs::remove_dir_all(&self.path).map_err(|source| DumpError::io(&self.path, source));
        debug!(dir = %self.path.display(), ok = result.is_ok(), "deleted dump directory");
        drop(self);
        result
    }

    pub fn exists(&self, item: &str) -> bool {
        is_valid_item_name(item) && self.path.join(item).is_file()
    }

    pub fn item_path(&self, item: &str) -> DumpResult<PathBuf> {
        check_item_name(item)?;
        Ok(self.path.join(item))
    }

    pub fn load_binary(&self, item: &str) -> DumpResult<Vec<u8>> {
        let path = self.item_path(item)?;
        fs::read(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => {
                DumpError::MissingItem { dir: self.path.clone(), item: item.to_string() }
            }
            _ => DumpError::io(&path, source),
        })
    }

    pub fn load_text(&self, item: &str) -> DumpResult<String> {
        let bytes = self.load_binary(item)?;
        String::from_utf8(bytes)
            .map_err(|_| DumpError::NotText { dir: self.path.clone(), item: item.to_string() })
    }

    /// Like `load_text`, but a missing item is `None`.
    pub fn load_text_opt(&self, item: &str) -> DumpResult<Option<String>> {
        match self.load_text(item) {
            Ok(text) => Ok(Some(text)),
            Err(DumpError::MissingItem { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn save_text(&self, item: &str, text: &str) -> DumpResult<()> {
        self.save_binary(item, text.as_bytes())
    }

    pub fn save_binary(&self, item: &str, data: &[u8]) -> DumpResult<()> {
        let path = self.item_path(item)?;
        fs::write(&path, data).map_err(|source| DumpError::io(&path, source))
    }

    /// Remove one item; returns whether it existed.
    pub fn delete_item(&self, item: &str) -> DumpResult<bool> {
        let path = self.item_path(item)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(DumpError::io(&path, source)),
        }
    }

    pub fn item_size(&self, item: &str) -> DumpResult<Option<u64>> {
        let path = self.item_path(item)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(DumpError::io(&path, source)),
        }
    }

    /// List the regular-file items, sorted by name.
    pub fn enumerate(&self) -> DumpResult<Vec<DumpItem>> {
        let entries = fs::read_dir(&self.path).map_err(|source| DumpError::io(&self.path, source))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| DumpError::io(&self.path, source))?;
            let file_type =
                entry.file_type().map_err(|source| DumpError::io(&entry.path(), source))?;
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let is_text = name != items::COREDUMP && {
                let bytes =
                    fs::read(entry.path()).map_err(|source| DumpError::io(&entry.path(), source))?;
                !bytes.contains(&0) && std::str::from_utf8(&bytes).is_ok()
            };
            out.push(DumpItem { name, is_text });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Owner uid recorded in the directory, if any.
    pub fn owner_uid(&self) -> DumpResult<Option<u32>> {
        Ok(self.load_text_opt(items::UID)?.and_then(|text| text.trim().parse().ok()))
    }

    pub fn accessible_by(&self, uid: u32) -> DumpResult<bool> {
        if uid == PRIVILEGED_UID {
            return Ok(true);
        }
        Ok(self.owner_uid()? == Some(uid))
    }
}

/// Whether `name` can be used as an item (file) name.
pub fn is_valid_item_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}

fn check_item_name(name: &str) -> DumpResult<()> {
    if is_valid_item_name(name) {
        Ok(())
    } else {
        Err(DumpError::InvalidItemName(name.to_string()))
    }
}

/// Whether the path is locked by some session right now.
pub fn is_locked(dir: &Path) -> bool {
    lock::marker_path(dir).exists()
}
