//! Per-file exclusive locks.
//!
//! A lock is a sibling directory `<file>.lock/` whose atomic creation is
//! the acquisition; `owner.json` inside records who holds it. A lock is
//! considered stale once its diagnostic is older than the staleness
//! threshold, or when the owning pid is dead and the host matches ours.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StoreError;

const OWNER_FILE: &str = "owner.json";

/// Acquisition policy. Defaults: 3 retries, 100 ms initial backoff doubling
/// up to 1 s, 10 s staleness threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            stale_after: Duration::from_secs(10),
        }
    }
}

/// Diagnostic written inside the lock directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockOwner {
    pid: u32,
    acquired_at: DateTime<Utc>,
    host: String,
}

/// Held lock. Removing the directory on drop releases it on every exit
/// path, including panics and early returns.
#[derive(Debug)]
pub struct LockGuard {
    lock_dir: PathBuf,
}

impl LockGuard {
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.lock_dir) {
            tracing::warn!(
                lock_dir = %self.lock_dir.display(),
                error = %e,
                "failed to release lock directory"
            );
        }
    }
}

/// Lock directory for a data file: `todo.json` -> `todo.json.lock/`.
pub fn lock_dir_for(file: &Path) -> PathBuf {
    let mut name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".lock");
    file.with_file_name(name)
}

/// Acquire an exclusive lock on `file` with bounded backoff.
pub fn acquire(file: &Path, opts: &LockOptions) -> Result<LockGuard, StoreError> {
    let lock_dir = lock_dir_for(file);
    if let Some(parent) = lock_dir.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::file(format!("create {}: {e}", parent.display())))?;
    }

    let mut backoff = opts.initial_backoff;
    let mut waited = Duration::ZERO;

    // First attempt plus `retries` retries.
    for attempt in 0..=opts.retries {
        match std::fs::create_dir(&lock_dir) {
            Ok(()) => {
                write_owner(&lock_dir);
                return Ok(LockGuard { lock_dir });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_stale(&lock_dir, opts.stale_after) {
                    tracing::warn!(lock_dir = %lock_dir.display(), "breaking stale lock");
                    let _ = std::fs::remove_dir_all(&lock_dir);
                    // Contend for it again without burning a backoff slot.
                    continue;
                }
            }
            Err(e) => {
                return Err(StoreError::file(format!(
                    "create lock {}: {e}",
                    lock_dir.display()
                )));
            }
        }

        if attempt < opts.retries {
            std::thread::sleep(backoff);
            waited += backoff;
            backoff = (backoff * 2).min(opts.max_backoff);
        }
    }

    Err(StoreError::LockTimeout {
        path: file.to_path_buf(),
        waited_ms: waited.as_millis() as u64,
    })
}

fn write_owner(lock_dir: &Path) {
    let owner = LockOwner {
        pid: std::process::id(),
        acquired_at: Utc::now(),
        host: hostname(),
    };
    match serde_json::to_vec(&owner) {
        Ok(bytes) => {
            if let Err(e) = std::fs::write(lock_dir.join(OWNER_FILE), bytes) {
                tracing::warn!(error = %e, "failed to write lock owner diagnostic");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to serialize lock owner"),
    }
}

/// A lock is stale when its diagnostic is past the threshold, when its
/// owner pid is dead on this host, or when the diagnostic is missing and
/// the directory itself is past the threshold (a crash between create_dir
/// and the owner write).
fn is_stale(lock_dir: &Path, stale_after: Duration) -> bool {
    let owner_path = lock_dir.join(OWNER_FILE);
    let owner: Option<LockOwner> = std::fs::read(&owner_path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok());

    match owner {
        Some(owner) => {
            let age = Utc::now().signed_duration_since(owner.acquired_at);
            if age.num_milliseconds() > stale_after.as_millis() as i64 {
                return true;
            }
            owner.host == hostname() && !pid_alive(owner.pid)
        }
        None => std::fs::metadata(lock_dir)
            .and_then(|m| m.modified())
            .map(|modified| {
                modified
                    .elapsed()
                    .map(|elapsed| elapsed > stale_after)
                    .unwrap_or(false)
            })
            .unwrap_or(false),
    }
}

fn pid_alive(pid: u32) -> bool {
    // SAFETY: signal 0 performs permission and existence checks only; no
    // signal is delivered.
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if ret == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is a valid writable buffer of the stated length;
    // gethostname NUL-terminates on success.
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return String::from("unknown");
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
