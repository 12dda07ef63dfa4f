//! Store lock files and atomic marker writes.
//!
//! When `repository.cross_process_lock` is on, the registry pairs each
//! in-process store mutex with an exclusive `flock` on
//! `<root>/.locks/<site>.<kind>.lock`, so two sitevault processes sharing a
//! root never mutate the same store at once. The holder's pid is written into
//! the file for diagnostics; the lock itself is the `flock`, not the content.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// How long a store lock is waited for unless configured otherwise.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive hold on a store lock file. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Wait up to `timeout_ms` for the lock at `path`, creating the file and
    /// its directory when missing. Gives up with [`Error::LockFailed`].
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = open(path)?;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        while !take(&file)? {
            if Instant::now() >= deadline {
                tracing::warn!(
                    path = %path.display(),
                    holder = holder(path).as_deref().unwrap_or("unknown"),
                    "timed out waiting for store lock"
                );
                return Err(Error::LockFailed(path.to_path_buf()));
            }
            thread::sleep(POLL_INTERVAL);
        }
        Self::held(file, path)
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = open(path)?;
        if take(&file)? {
            Self::held(file, path).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn held(mut file: File, path: &Path) -> Result<Self> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::debug!(path = %self.path.display(), error = %err, "store lock release failed");
        }
    }
}

/// Pid recorded by the last holder of the lock at `path`, if any.
pub fn holder(path: &Path) -> Option<String> {
    let pid = fs::read_to_string(path).ok()?;
    let pid = pid.trim();
    (!pid.is_empty()).then(|| pid.to_string())
}

fn open(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

/// One non-blocking attempt; `false` means someone else holds it.
fn take(file: &File) -> Result<bool> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(true),
        Err(err) if busy(&err) => Ok(false),
        Err(err) => Err(Error::Io(err)),
    }
}

fn busy(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    // sharing and lock violations on Windows
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

/// Replace `path` with `data` through a uniquely named sibling and a rename,
/// so a marker is never observed half-written.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let dir = path
        .parent()
        .ok_or_else(|| Error::InvalidArgument(format!("no parent for {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = dir.join(format!(".{name}.{}.tmp", Uuid::new_v4().simple()));

    let written = File::create(&staging).and_then(|mut file| {
        file.write_all(data)?;
        file.sync_all()
    });
    if let Err(err) = written.and_then(|()| fs::rename(&staging, path)) {
        let _ = fs::remove_file(&staging);
        return Err(Error::Io(err));
    }
    Ok(())
}
