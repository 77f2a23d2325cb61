use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{FarmError, Result};
use crate::lease::lock;
use crate::lease::path::{abort_path, parse_lease_basename};

/// One lease file observed by [`scan`].
///
/// `mtime` is the modification time at scan; the [`expired`](Self::expired)
/// predicate re-reads it so a heartbeat between scan and classification is
/// never missed.
#[derive(Debug, Clone)]
pub struct LeaseEntry {
    pub id: u64,
    pub path: PathBuf,
    pub mtime: SystemTime,
}

/// Enumerate the lease files in `dir`, ordered by id.
///
/// Entries whose basename is not a pure decimal integer are not lease files
/// and stay invisible, as do entries that vanish between listing and stat
/// (an owner completing mid-scan is normal).
pub fn scan(dir: &Path) -> Result<Vec<LeaseEntry>> {
    let scan_err = |source: io::Error| FarmError::ScanIo {
        dir: dir.to_path_buf(),
        source,
    };

    let mut leases = Vec::new();
    for entry in fs::read_dir(dir).map_err(scan_err)? {
        let entry = entry.map_err(scan_err)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(id) = parse_lease_basename(name) else {
            continue;
        };
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(scan_err(e)),
        };
        if !meta.is_file() {
            continue;
        }
        let mtime = meta.modified().map_err(scan_err)?;
        leases.push(LeaseEntry {
            id,
            path: entry.path(),
            mtime,
        });
    }
    leases.sort_by_key(|lease| lease.id);
    Ok(leases)
}

impl LeaseEntry {
    /// Crash-residue test: the file still exists, its age exceeds the
    /// freshness window (strictly; an exactly-window-old lease is not
    /// expired), and no process holds the exclusive lock.
    ///
    /// Age and lock state are both required: age alone would misread a
    /// healthy-but-quiet owner, lock state alone would misread a
    /// just-released lock whose ex-owner is about to unlink. Probe errors
    /// read as "still held" so an I/O hiccup never reaps a live job.
    pub fn expired(&self, now: SystemTime, freshness_window: Duration) -> bool {
        let mtime = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(_) => return false,
        };
        let age = match now.duration_since(mtime) {
            Ok(age) => age,
            // An mtime in the future is as fresh as it gets.
            Err(_) => return false,
        };
        if age <= freshness_window {
            return false;
        }
        self.unlocked()
    }

    /// Unlocked with the age check elided. Used by post-shutdown sweeps
    /// where any unheld lease is garbage by definition.
    pub fn orphaned(&self) -> bool {
        self.unlocked()
    }

    /// Path of this lease's abort endpoint, whether or not one exists.
    pub fn abort_endpoint(&self) -> PathBuf {
        let dir = self.path.parent().unwrap_or_else(|| Path::new(""));
        abort_path(dir, self.id)
    }

    fn unlocked(&self) -> bool {
        let file = match OpenOptions::new().read(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
            Err(e) => {
                tracing::debug!(id = self.id, error = %e, "lock probe open failed, assuming live");
                return false;
            }
        };
        match lock::probe_unlocked(&file) {
            Ok(unlocked) => unlocked,
            Err(e) => {
                tracing::debug!(id = self.id, error = %e, "lock probe failed, assuming live");
                false
            }
        }
    }
}
