//! Lease-file protocol: the on-disk contract between job owners and the
//! supervisor.
//!
//! A lease is the right, held by exactly one process, to execute one job.
//! On disk it is a file in the lease directory whose basename is the decimal
//! job id. Its meaning is carried entirely by presence, basename, mtime, and
//! whether an exclusive advisory lock is held on it:
//!
//! - **Locked** (any mtime): a live owner is working the job.
//! - **Unlocked, fresh**: the owner just released or is mid-handoff; leave it.
//! - **Unlocked, older than the freshness window**: the owner died without
//!   unlinking: the kernel dropped the lock but nobody cleaned up. This
//!   residue is the crash signal the supervisor acts on.
//!
//! Next to every lease file there may be a `<id>.sock` datagram endpoint for
//! cooperative cancellation. Its absence is not a crash indicator.
//!
//! # Components
//!
//! - [`path`]: the naming rule (pure decimal basename) and sibling paths
//! - [`lock`]: non-blocking exclusive `flock` helpers
//! - [`acquirer`]: [`LeaseHandle`], the owner-side RAII guard
//! - [`scanner`]: [`scan`] plus the `expired`/`orphaned` predicates
//! - [`abort`]: the datagram abort endpoint, both sides

pub mod abort;
pub mod acquirer;
pub mod lock;
pub mod path;
pub mod scanner;

pub use abort::{send_abort, AbortListener};
pub use acquirer::{AbortPolicy, LeaseHandle};
pub use scanner::{scan, LeaseEntry};
