use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::{DumpError, DumpResult, LockMode};

/// Poll interval while waiting for a busy directory in blocking mode.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Exclusive lock on a dump directory, released on drop.
///
/// The lock is a sibling marker file `<dir>.lock` holding the owner's PID.
#[derive(Debug)]
pub(crate) struct DirLock {
    marker: PathBuf,
}

enum Attempt {
    Acquired,
    Held(Option<u32>),
}

impl DirLock {
    pub(crate) fn acquire(dir: &Path, mode: LockMode) -> DumpResult<Self> {
        let marker = marker_path(dir);
        let mut waited = false;
        loop {
            match try_lock(&marker).map_err(|source| DumpError::io(&marker, source))? {
                Attempt::Acquired => {
                    if waited {
                        debug!(dir = %dir.display(), "acquired dump directory lock after waiting");
                    }
                    return Ok(Self { marker });
                }
                Attempt::Held(pid) => match mode {
                    LockMode::FailQuietly => return Err(DumpError::Busy(dir.to_path_buf())),
                    LockMode::Blocking => {
                        if !waited {
                            debug!(dir = %dir.display(), ?pid, "dump directory is locked, waiting");
                            waited = true;
                        }
                        thread::sleep(LOCK_POLL_INTERVAL);
                    }
                },
            }
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.marker) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(marker = %self.marker.display(), "failed to remove lock marker: {err}");
            }
        }
    }
}

/// `<dir>.lock`, next to the directory rather than inside it.
pub(crate) fn marker_path(dir: &Path) -> PathBuf {
    let mut name = OsString::from(dir.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

fn try_lock(marker: &Path) -> io::Result<Attempt> {
    // A stale marker is removed and the creation retried; bound the retries so
    // two processes fighting over the same stale marker cannot spin forever.
    for _ in 0..8 {
        match OpenOptions::new().write(true).create_new(true).open(marker) {
            Ok(file) => {
                stamp_owner(file, marker)?;
                return Ok(Attempt::Acquired);
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }

        let contents = match fs::read_to_string(marker) {
            Ok(contents) => contents,
            // Released between our create and read; try again.
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        // An empty marker is being written right now.
        let pid = contents.trim().parse::<u32>().ok();
        match pid {
            Some(pid) if !process_alive(pid) => {
                if reclaim_stale(marker, pid)? {
                    warn!(marker = %marker.display(), pid, "removed stale lock marker");
                }
                continue;
            }
            _ => return Ok(Attempt::Held(pid)),
        }
    }
    Ok(Attempt::Held(None))
}

/// Write our PID into a freshly created marker. On failure the marker is
/// removed, since an empty one reads as "being written" and would never clear.
fn stamp_owner(mut file: impl Write, marker: &Path) -> io::Result<()> {
    let result = write!(file, "{}", std::process::id()).and_then(|()| file.flush());
    if let Err(err) = result {
        let _ = fs::remove_file(marker);
        return Err(err);
    }
    Ok(())
}

/// Remove a marker owned by the dead process `pid`.
///
/// The marker is renamed away before it is checked again, so a marker that
/// another process created after we read the stale PID is put back instead of
/// deleted. Returns whether the stale marker was removed by this call.
fn reclaim_stale(marker: &Path, pid: u32) -> io::Result<bool> {
    let mut name = OsString::from(marker.as_os_str());
    name.push(format!(".stale.{}", std::process::id()));
    let claimed = PathBuf::from(name);

    match fs::rename(marker, &claimed) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    }

    let owner = fs::read_to_string(&claimed)?.trim().parse::<u32>().ok();
    if owner == Some(pid) {
        fs::remove_file(&claimed)?;
        return Ok(true);
    }

    // Not the marker we judged stale. Restore it unless a new one already exists.
    match fs::hard_link(&claimed, marker) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
        Err(err) => return Err(err),
    }
    fs::remove_file(&claimed)?;
    Ok(false)
}

fn process_alive(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    if !proc_root.join("self").exists() {
        // Without procfs there is no cheap liveness check; assume alive.
        return true;
    }
    proc_root.join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_pid_write_removes_the_marker() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let marker = tmp.path().join("dir.lock");
        fs::write(&marker, "").expect("create marker");

        assert!(stamp_owner(FullDisk, &marker).is_err());
        assert!(!marker.exists());
    }

    #[test]
    fn stale_marker_is_removed_without_leftovers() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let marker = tmp.path().join("dir.lock");
        fs::write(&marker, "4294967290").expect("write marker");

        assert!(reclaim_stale(&marker, 4_294_967_290).expect("reclaim"));
        assert!(!marker.exists());
        assert_eq!(fs::read_dir(tmp.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn marker_replaced_after_stale_read_is_kept() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let marker = tmp.path().join("dir.lock");
        // Another contender already reclaimed the dead owner's marker and took the lock.
        let live = std::process::id().to_string();
        fs::write(&marker, &live).expect("write marker");

        assert!(!reclaim_stale(&marker, 4_294_967_290).expect("reclaim"));
        assert_eq!(fs::read_to_string(&marker).expect("marker kept"), live);
        assert_eq!(fs::read_dir(tmp.path()).expect("read dir").count(), 1);
    }

    #[test]
    fn vanished_marker_is_not_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let marker = tmp.path().join("dir.lock");
        assert!(!reclaim_stale(&marker, 1).expect("reclaim"));
    }
}
