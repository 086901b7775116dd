//! Pid marker file lock
//!
//! The marker holds the owner's decimal pid and a newline. Acquiring checks
//! whether a recorded owner is still alive, reclaims the marker if not, and
//! then creates it exclusively. The file stays open until release.
//!
//! Reclaiming moves the stale marker aside under a private name first. Only
//! the acquirer whose move captured the exact content it judged stale may
//! go on to create a new marker; anyone else finds a live one.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

/// Markers without a readable pid are treated as held for this long
pub const UNPARSABLE_GRACE: Duration = Duration::from_secs(2);

#[cfg(windows)]
const FILE_SHARE_READ: u32 = 0x0000_0001;

/// Distinguishes reclaim attempts made by one process
static RECLAIM_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another instance is already running{}", describe_owner(.pid))]
    AlreadyRunning { pid: Option<u32> },

    #[error("lock marker {}: {source}", .path.display())]
    MarkerIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn describe_owner(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => format!(" (pid {pid})"),
        None => String::new(),
    }
}

impl LockError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::MarkerIo {
            path: path.to_owned(),
            source,
        }
    }
}

/// Ownership of the singleton marker
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    pid: u32,
    file: Option<File>,
}

/// What an existing marker tells us about its owner
enum Existing {
    Held(Option<u32>),
    /// Raw marker content that was judged stale
    Stale(String),
}

impl LockHandle {
    /// Acquire the marker at `path` for this process
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        Self::acquire_with(path.as_ref(), super::probe::is_process_alive)
    }

    pub(crate) fn acquire_with(
        path: &Path,
        is_alive: impl Fn(u32) -> bool,
    ) -> Result<Self, LockError> {
        let pid = std::process::id();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| LockError::io(path, e))?;
        }

        match inspect(path, &is_alive)? {
            Some(Existing::Held(owner)) => {
                info!(path = %path.display(), ?owner, "lock held by a running instance");
                return Err(LockError::AlreadyRunning { pid: owner });
            }
            Some(Existing::Stale(content)) => {
                info!(path = %path.display(), "reclaiming stale lock marker");
                reclaim(path, &content)?;
            }
            None => {}
        }

        let mut file = match create_exclusive(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Lost the race to another acquirer between inspect and create
                let owner = read_pid(path).ok().flatten();
                return Err(LockError::AlreadyRunning { pid: owner });
            }
            Err(e) => return Err(LockError::io(path, e)),
        };

        if let Err(e) = writeln!(file, "{pid}").and_then(|()| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(path);
            return Err(LockError::io(path, e));
        }

        info!(path = %path.display(), pid, "singleton lock acquired");
        Ok(Self {
            path: path.to_owned(),
            pid,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Close the handle and delete the marker. Safe to call repeatedly.
    ///
    /// The marker is only removed while it still names this process.
    /// Failures are logged, never returned.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        drop(file);

        match read_pid(&self.path) {
            Ok(Some(owner)) if owner == self.pid => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "failed to remove lock marker");
                    return;
                }
                info!(path = %self.path.display(), "singleton lock released");
            }
            Ok(owner) => {
                warn!(
                    path = %self.path.display(),
                    ?owner,
                    pid = self.pid,
                    "lock marker no longer ours, leaving it"
                );
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "lock marker already gone");
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read lock marker");
            }
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

fn create_exclusive(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        options.share_mode(FILE_SHARE_READ);
    }

    options.open(path)
}

fn read_pid(path: &Path) -> io::Result<Option<u32>> {
    let content = fs::read_to_string(path)?;
    Ok(content.trim().parse::<u32>().ok())
}

fn set_aside_path(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = RECLAIM_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".{}.{nanos}.{seq}.stale", std::process::id()));
    path.with_file_name(name)
}

/// Move a stale marker out of the way, but only if it is still the one we judged
///
/// Another acquirer may have reclaimed the marker and written its own pid since
/// `inspect` read it. In that case the fresh marker is put back and the caller
/// is told the lock is held.
fn reclaim(path: &Path, stale: &str) -> Result<(), LockError> {
    let aside = set_aside_path(path);
    match fs::rename(path, &aside) {
        Ok(()) => {}
        // Someone else moved it first; `create_exclusive` decides the winner
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        // An open owner handle without delete sharing blocks the move on Windows
        #[cfg(windows)]
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            return Err(LockError::AlreadyRunning {
                pid: read_pid(path).ok().flatten(),
            });
        }
        Err(e) => return Err(LockError::io(path, e)),
    }

    let captured = fs::read_to_string(&aside);
    if matches!(&captured, Ok(content) if content == stale) {
        if let Err(e) = fs::remove_file(&aside) {
            warn!(path = %aside.display(), error = %e, "failed to remove reclaimed lock marker");
        }
        return Ok(());
    }

    let owner = captured.ok().and_then(|content| content.trim().parse::<u32>().ok());
    info!(path = %path.display(), ?owner, "lock marker was reclaimed by another instance");
    restore(&aside, path);
    Err(LockError::AlreadyRunning { pid: owner })
}

/// Put a marker moved aside by mistake back without clobbering a newer one
fn restore(aside: &Path, path: &Path) {
    match fs::hard_link(aside, path) {
        Ok(()) => {
            let _ = fs::remove_file(aside);
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            warn!(path = %path.display(), "lock marker replaced while restoring it");
            let _ = fs::remove_file(aside);
        }
        Err(_) => {
            if let Err(e) = fs::rename(aside, path) {
                warn!(path = %aside.display(), error = %e, "failed to restore lock marker");
            }
        }
    }
}

fn inspect(path: &Path, is_alive: &impl Fn(u32) -> bool) -> Result<Option<Existing>, LockError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LockError::io(path, e)),
    };

    let parsed = content.trim().parse::<u32>();
    match parsed {
        Ok(owner) if is_alive(owner) => Ok(Some(Existing::Held(Some(owner)))),
        Ok(owner) => {
            debug!(owner, "lock owner is not running");
            Ok(Some(Existing::Stale(content)))
        }
        Err(_) => {
            let age = fs::metadata(path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            match age {
                Some(age) if age >= UNPARSABLE_GRACE => {
                    debug!(?age, "unparsable lock marker past grace period");
                    Ok(Some(Existing::Stale(content)))
                }
                _ => Ok(Some(Existing::Held(None))),
            }
        }
    }
}
