//! Process-exclusive embed run lock (§5): a file containing
//! `pid=<n>\nstarted_at=<RFC3339>`, reclaimed if stale.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{CoreError, Result};

const STALE_AFTER_HOURS: i64 = 12;

/// Guard that removes the lock file on drop.
pub struct EmbedLock {
    path: PathBuf,
}

impl EmbedLock {
    /// Acquire the lock at `path`, reclaiming it if the existing holder is
    /// stale: older than 12 hours, its PID is not alive, or its contents are
    /// malformed (§5).
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(existing) = read_lock(path) {
            let reclaimable = match existing {
                Ok(ref held) => is_stale(held),
                Err(_) => true,
            };
            if !reclaimable {
                let pid = existing.ok().map(|h| h.pid).unwrap_or(0);
                return Err(CoreError::LockHeld { pid });
            }
        }

        let contents = format!("pid={}\nstarted_at={}\n", std::process::id(), Utc::now().to_rfc3339());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(Self { path: path.to_path_buf() })
    }
}

impl Drop for EmbedLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

struct Held {
    pid: u32,
    started_at: chrono::DateTime<Utc>,
}

fn read_lock(path: &Path) -> Option<std::result::Result<Held, ()>> {
    let raw = std::fs::read_to_string(path).ok()?;
    Some(parse_lock(&raw).ok_or(()))
}

fn parse_lock(raw: &str) -> Option<Held> {
    let mut pid = None;
    let mut started_at = None;
    for line in raw.lines() {
        if let Some(v) = line.strip_prefix("pid=") {
            pid = v.trim().parse::<u32>().ok();
        } else if let Some(v) = line.strip_prefix("started_at=") {
            started_at = chrono::DateTime::parse_from_rfc3339(v.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    Some(Held { pid: pid?, started_at: started_at? })
}

fn is_stale(held: &Held) -> bool {
    let age = Utc::now() - held.started_at;
    if age > chrono::Duration::hours(STALE_AFTER_HOURS) {
        return true;
    }
    !pid_is_alive(held.pid)
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // Signal 0 performs no action but reports whether the process exists
    // and is addressable from this process's permissions.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}
