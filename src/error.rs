use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FarmError {
    /// Another process holds the exclusive lock on this lease. Never
    /// auto-retried: a busy lease means a live concurrent owner.
    #[error("lease {0} is busy (held by another process)")]
    AcquireBusy(u64),

    /// The owner went to refresh its lease and found the file unlinked or
    /// replaced. The owner must stop work on the job.
    #[error("lease file for job {id} vanished from {}", .path.display())]
    LeaseMissing { id: u64, path: PathBuf },

    #[error("failed to scan lease directory {}: {source}", .dir.display())]
    ScanIo {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remediate expired lease {id}: {source}")]
    RemediationIo {
        id: u64,
        #[source]
        source: io::Error,
    },

    #[error("abort endpoint for lease {id} unreachable: {source}")]
    AbortUnreachable {
        id: u64,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("I/O error on lease {id}: {source}")]
    LeaseIo {
        id: u64,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FarmError>;
