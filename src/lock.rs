//! File locking and atomic writes for drift state files
//!
//! Several task-runner processes may append to the same evolution index. The
//! append path is read-modify-write, so it runs under an exclusive `fs2` lock
//! on a sibling `<file>.lock` and publishes the result with temp-file + rename.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Default lock timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Exclusive lock guard, released on drop
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock, polling until `timeout_ms` elapses
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut file = open_lock_file(path)?;

        loop {
            file = match try_lock(file, path)? {
                Ok(lock) => return Ok(lock),
                Err(file) => file,
            };
            if Instant::now() >= deadline {
                tracing::debug!(path = %path.display(), timeout_ms, "lock wait timed out");
                return Err(Error::LockFailed(path.to_path_buf()));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Try once; `Ok(None)` when another holder has the lock
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        Ok(try_lock(open_lock_file(path)?, path)?.ok())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// One non-blocking attempt. Contention hands the file back for a retry.
fn try_lock(file: File, path: &Path) -> Result<std::result::Result<FileLock, File>> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Ok(FileLock {
            file,
            path: path.to_path_buf(),
        })),
        Err(err) if is_contended(&err) => Ok(Err(file)),
        Err(err) => Err(Error::Io(err)),
    }
}

fn is_contended(err: &io::Error) -> bool {
    // Windows reports sharing/lock violations as raw OS errors 32 and 33.
    err.kind() == io::ErrorKind::WouldBlock
        || (cfg!(windows) && matches!(err.raw_os_error(), Some(32 | 33)))
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

/// Lock file guarding `path`
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Atomically replace `path` with `data`
///
/// Does not take a lock; callers that read-modify-write must hold one.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    // Same directory as the target so the rename stays on one filesystem.
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
