//! The build lock: one process at a time may build into a store.
//!
//! The lock is an OS file lock on `<db>/build.lock`. The holder writes its pid
//! and start time into the file so a waiting process can say who it waits for.
//! The OS releases the lock when the holder exits, so a stale file is harmless.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const LOCK_FILENAME: &str = "build.lock";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Who holds the lock, as recorded in the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
  pub pid: u32,
  pub since_unix: u64,
  pub purpose: String,
}

impl std::fmt::Display for Holder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} (pid {}, since unix time {})", self.purpose, self.pid, self.since_unix)
  }
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "gave up after {}s waiting for the store build lock{}\n\
     If no sprout process is running, remove {}",
    .waited.as_secs(),
    .holder.as_ref().map(|h| format!(" held by {h}")).unwrap_or_default(),
    .lock_path.display()
  )]
  Timeout {
    lock_path: PathBuf,
    holder: Option<Holder>,
    waited: Duration,
  },

  #[error("failed to lock '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A held build lock; released on drop.
pub struct BuildLock {
  file: File,
  path: PathBuf,
}

impl BuildLock {
  /// Lock `db_dir`, waiting up to `wait` for another holder to finish.
  pub fn acquire(db_dir: &Path, purpose: &str, wait: Duration) -> Result<Self, StoreLockError> {
    let path = db_dir.join(LOCK_FILENAME);

    std::fs::create_dir_all(db_dir).map_err(io_error(&path))?;
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(io_error(&path))?;

    let start = Instant::now();
    let mut announced = false;
    loop {
      match try_lock(&file) {
        Ok(()) => break,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(io_error(&path)(e)),
      }
      let waited = start.elapsed();
      if waited >= wait {
        return Err(StoreLockError::Timeout {
          holder: read_holder(&path),
          lock_path: path,
          waited,
        });
      }
      if !announced {
        match read_holder(&path) {
          Some(holder) => info!(%holder, "waiting for the store build lock"),
          None => info!("waiting for the store build lock"),
        }
        announced = true;
      }
      thread::sleep(POLL_INTERVAL);
    }

    let lock = BuildLock { file, path };
    lock.record(purpose).map_err(io_error(&lock.path))?;
    debug!(path = %lock.path.display(), "acquired build lock");
    Ok(lock)
  }

  pub fn holder(&self) -> Option<Holder> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0)).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
  }

  fn record(&self, purpose: &str) -> io::Result<()> {
    let holder = Holder {
      pid: std::process::id(),
      since_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      purpose: purpose.to_string(),
    };
    let json = serde_json::to_vec(&holder).map_err(io::Error::other)?;

    let mut file = &self.file;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&json)?;
    file.flush()
  }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreLockError + '_ {
  move |source| StoreLockError::Io {
    path: path.to_path_buf(),
    source,
  }
}

fn read_holder(path: &Path) -> Option<Holder> {
  let contents = std::fs::read_to_string(path).ok()?;
  serde_json::from_str(&contents).ok()
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive).map_err(io::Error::from)
}

#[cfg(windows)]
fn try_lock(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  // SAFETY: OVERLAPPED is plain data and valid when zeroed; the handle is owned by `file`.
  let ok = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(
      handle,
      LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
      0,
      1,
      0,
      &mut overlapped,
    )
  };
  if ok != 0 {
    return Ok(());
  }
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    return Err(io::Error::from(io::ErrorKind::WouldBlock));
  }
  Err(err)
}
