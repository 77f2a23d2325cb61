use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{FarmError, Result};
use crate::lease::abort::AbortListener;
use crate::lease::lock;
use crate::lease::path::{abort_path, lease_path};

/// How `acquire` treats the abort endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbortPolicy {
    /// Bind the endpoint if possible; a lease without one is still valid.
    #[default]
    Optional,
    /// Fail the acquire (and tear the lease back down) when the endpoint
    /// cannot be bound. For owners that need guaranteed cancellation.
    Required,
    /// Do not bind an endpoint.
    Disabled,
}

/// Diagnostic payload written into the lease file on acquire. Nothing reads
/// it back; it exists for humans poking at a live lease directory.
#[derive(Debug, Serialize)]
struct LeasePayload {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Owner-side handle to one lease: the file plus its exclusive lock.
///
/// Holding a `LeaseHandle` is holding the right to execute the job. Every
/// exit path through [`complete`](Self::complete) or `Drop` unlinks the
/// lease file and the abort endpoint before the lock is released. If the
/// process dies without dropping, the kernel releases the lock but leaves
/// the file, which is the residue the scanner reads as a crash.
#[derive(Debug)]
pub struct LeaseHandle {
    id: u64,
    path: PathBuf,
    file: File,
    ino: u64,
    abort: Option<AbortListener>,
    released: bool,
}

impl LeaseHandle {
    /// Acquire the lease for `id` in `dir` with the default abort policy.
    pub fn acquire(dir: &Path, id: u64) -> Result<Self> {
        Self::acquire_with(dir, id, AbortPolicy::Optional)
    }

    /// Create (truncating) the lease file and take the exclusive lock,
    /// failing with [`FarmError::AcquireBusy`] if any process already holds
    /// it. Exactly one process can hold a given lease at a time.
    pub fn acquire_with(dir: &Path, id: u64, policy: AbortPolicy) -> Result<Self> {
        let path = lease_path(dir, id);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| FarmError::LeaseIo { id, source: e })?;

        match lock::try_lock_exclusive(&file) {
            Ok(true) => {}
            Ok(false) => return Err(FarmError::AcquireBusy(id)),
            Err(e) => return Err(FarmError::LeaseIo { id, source: e }),
        }

        let ino = file
            .metadata()
            .map_err(|e| FarmError::LeaseIo { id, source: e })?
            .ino();

        // Best-effort diagnostics; the protocol never depends on contents.
        let payload = LeasePayload {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        if let Ok(bytes) = serde_json::to_vec(&payload) {
            if let Err(e) = (&file).write_all(&bytes) {
                tracing::debug!(id, error = %e, "could not write lease payload");
            }
        }

        let sock = abort_path(dir, id);
        let abort = match policy {
            AbortPolicy::Disabled => None,
            AbortPolicy::Optional => match AbortListener::bind(&sock) {
                Ok(listener) => Some(listener),
                Err(e) => {
                    tracing::debug!(id, error = %e, "abort endpoint unavailable, continuing without");
                    None
                }
            },
            AbortPolicy::Required => match AbortListener::bind(&sock) {
                Ok(listener) => Some(listener),
                Err(e) => {
                    let _ = fs::remove_file(&path);
                    return Err(FarmError::LeaseIo { id, source: e });
                }
            },
        };

        tracing::debug!(id, path = %path.display(), "lease acquired");
        Ok(Self {
            id,
            path,
            file,
            ino,
            abort,
            released: false,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The abort endpoint, when one was bound.
    pub fn abort_listener(&self) -> Option<&AbortListener> {
        self.abort.as_ref()
    }

    /// Heartbeat: bump the lease mtime so scanners keep reading it as fresh.
    ///
    /// Must be called at an interval strictly shorter than the freshness
    /// window. Fails with [`FarmError::LeaseMissing`] when the file was
    /// unlinked or replaced underneath us; the owner must abort the job.
    pub fn refresh(&self) -> Result<()> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FarmError::LeaseMissing {
                    id: self.id,
                    path: self.path.clone(),
                })
            }
            Err(e) => {
                return Err(FarmError::LeaseIo {
                    id: self.id,
                    source: e,
                })
            }
        };
        if meta.ino() != self.ino {
            // A remediated-and-reacquired lease is someone else's file now.
            return Err(FarmError::LeaseMissing {
                id: self.id,
                path: self.path.clone(),
            });
        }
        self.file
            .set_modified(SystemTime::now())
            .map_err(|e| FarmError::LeaseIo {
                id: self.id,
                source: e,
            })
    }

    /// Normal-completion path: unlink the lease file and the abort endpoint,
    /// then release the lock by dropping the descriptor.
    pub fn complete(mut self) -> Result<()> {
        self.teardown().map_err(|e| FarmError::LeaseIo {
            id: self.id,
            source: e,
        })?;
        tracing::debug!(id = self.id, "lease completed");
        Ok(())
    }

    fn teardown(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        // Listener drop unlinks the socket file.
        self.abort = None;
        match fs::metadata(&self.path) {
            // Only unlink our own incarnation; a reaped-and-reacquired id
            // belongs to the successor now.
            Ok(meta) if meta.ino() == self.ino => match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            },
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        // Best-effort: the kernel drops the lock with the descriptor either
        // way, and a failed unlink here is what the scanner exists for.
        let _ = self.teardown();
    }
}
